use std::os::raw::{c_double, c_int};
use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::info;

use crate::error::ExportError;
use crate::export::templates::{INTEGRATOR_LIB, MODEL_LIB};

/// `void rhs(const double *in, double *out)` and `rhs_jac` with the same signature
pub type RhsFn = unsafe extern "C" fn(input: *const c_double, output: *mut c_double);

/// `int integrate(double *buffer, int cold_start)`
pub type IntegrateFn = unsafe extern "C" fn(buffer: *mut c_double, cold_start: c_int) -> c_int;

/// Entry points of a compiled model and integrator.
///
/// The function pointers stay valid as long as the libraries they came from, which this
/// struct keeps loaded.
pub struct NativeRoutines {
    rhs: RhsFn,
    rhs_jac: RhsFn,
    integrate: IntegrateFn,
    _libraries: Vec<Library>,
}

impl std::fmt::Debug for NativeRoutines {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeRoutines")
            .field("libraries", &self._libraries.len())
            .finish_non_exhaustive()
    }
}

fn open(path: PathBuf) -> Result<Library, ExportError> {
    info!("loading {}", path.display());
    unsafe { Library::new(&path) }.map_err(|source| ExportError::Load { path, source })
}

fn symbol<T: Copy>(lib: &Library, path: &Path, name: &str) -> Result<T, ExportError> {
    let sym = unsafe { lib.get::<T>(name.as_bytes()) }.map_err(|_| ExportError::MissingSymbol {
        path: path.to_path_buf(),
        symbol: name.to_string(),
    })?;
    Ok(*sym)
}

impl NativeRoutines {
    /// Loads `integrator.so` and `model.so` from a built cache entry.
    ///
    /// # Safety
    ///
    /// Loading runs the libraries' initializers, and the resolved routines read and write
    /// buffers whose sizes were fixed when the libraries were compiled. The caller must only
    /// pair the result with the [`StateLayout`](super::StateLayout) of the model the entry was
    /// generated from, otherwise `integrate` writes past the end of the state buffer.
    ///
    /// ```compile_fail
    /// # fn f(dir: &std::path::Path) {
    /// let _ = daexport::native::NativeRoutines::load(dir);
    /// # }
    /// ```
    pub unsafe fn load(dir: &Path) -> Result<Self, ExportError> {
        let integrator_path = dir.join(INTEGRATOR_LIB);
        let model_path = dir.join(MODEL_LIB);
        let integrator_lib = open(integrator_path.clone())?;
        let model_lib = open(model_path.clone())?;

        let integrate = symbol::<IntegrateFn>(&integrator_lib, &integrator_path, "integrate")?;
        let rhs = symbol::<RhsFn>(&model_lib, &model_path, "rhs")?;
        let rhs_jac = symbol::<RhsFn>(&model_lib, &model_path, "rhs_jac")?;

        Ok(Self {
            rhs,
            rhs_jac,
            integrate,
            _libraries: vec![integrator_lib, model_lib],
        })
    }

    /// Wraps routines that are not backed by a loaded library.
    ///
    /// # Safety
    ///
    /// The functions must follow the calling convention of [`RhsFn`] and [`IntegrateFn`] and
    /// must stay callable for the lifetime of the returned value.
    pub unsafe fn from_raw(rhs: RhsFn, rhs_jac: RhsFn, integrate: IntegrateFn) -> Self {
        Self {
            rhs,
            rhs_jac,
            integrate,
            _libraries: Vec::new(),
        }
    }

    /// # Safety
    ///
    /// `input` and `output` must have the lengths the compiled model expects.
    pub(crate) unsafe fn rhs(&self, input: &[f64], output: &mut [f64]) {
        (self.rhs)(input.as_ptr(), output.as_mut_ptr())
    }

    /// # Safety
    ///
    /// Same as [`Self::rhs`], with the Jacobian output length.
    pub(crate) unsafe fn rhs_jac(&self, input: &[f64], output: &mut [f64]) {
        (self.rhs_jac)(input.as_ptr(), output.as_mut_ptr())
    }

    /// # Safety
    ///
    /// `buffer` must be a full integration state buffer for the compiled model.
    pub(crate) unsafe fn integrate(&self, buffer: &mut [f64], cold_start: bool) -> i32 {
        (self.integrate)(buffer.as_mut_ptr(), c_int::from(cold_start))
    }
}
