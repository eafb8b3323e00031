//! Binding to the external integrator generator, shipped as a shared library.

use std::env;
use std::ffi::CString;
use std::os::raw::{c_char, c_double, c_int};
use std::path::{Path, PathBuf};
use std::ptr;

use libloading::{Library, Symbol};
use tracing::info;

use super::generate::{IntegratorCodegen, IntegratorRequest};
use crate::error::ExportError;

/// Environment variable pointing at the generator library
pub const INTERFACE_LIB_ENV: &str = "DAEXPORT_INTERFACE_LIB";

const MAKE_INTEGRATOR_SYMBOL: &str = "makeRienIntegrator";

type MakeIntegratorFn = unsafe extern "C" fn(
    path: *const c_char,
    num_intervals: c_int,
    timestep: c_double,
    integrator_type: *const c_char,
    grid: *const c_double,
    num_integrator_steps: c_int,
    nx: c_int,
    nz: c_int,
    nup: c_int,
) -> c_int;

/// [`IntegratorCodegen`] calling `makeRienIntegrator` in a dynamically loaded library
pub struct AcadoInterface {
    path: PathBuf,
    lib: Library,
}

impl AcadoInterface {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ExportError> {
        let path = path.into();
        info!("loading integrator generator {}", path.display());
        let lib = unsafe { Library::new(&path) }.map_err(|source| ExportError::Load {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path, lib })
    }

    /// Loads the library named by `DAEXPORT_INTERFACE_LIB`
    pub fn from_env() -> Result<Self, ExportError> {
        let path = env::var(INTERFACE_LIB_ENV).map_err(|_| {
            ExportError::Interface(format!("{} is not set", INTERFACE_LIB_ENV))
        })?;
        Self::load(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Passes the export directory to C without lossy conversion
#[cfg(unix)]
fn c_path(dir: &Path) -> Result<CString, ExportError> {
    use std::os::unix::ffi::OsStrExt;
    CString::new(dir.as_os_str().as_bytes())
        .map_err(|e| ExportError::Interface(format!("invalid export path: {}", e)))
}

#[cfg(not(unix))]
fn c_path(dir: &Path) -> Result<CString, ExportError> {
    let utf8 = dir.to_str().ok_or_else(|| {
        ExportError::Interface(format!("export path {} is not valid UTF-8", dir.display()))
    })?;
    CString::new(utf8).map_err(|e| ExportError::Interface(format!("invalid export path: {}", e)))
}

fn c_int_arg(name: &str, value: usize) -> Result<c_int, ExportError> {
    c_int::try_from(value)
        .map_err(|_| ExportError::Interface(format!("{} = {} does not fit a C int", name, value)))
}

impl IntegratorCodegen for AcadoInterface {
    fn export(&self, dir: &Path, request: &IntegratorRequest<'_>) -> Result<i32, ExportError> {
        let make_integrator: Symbol<MakeIntegratorFn> =
            unsafe { self.lib.get(MAKE_INTEGRATOR_SYMBOL.as_bytes()) }.map_err(|_| {
                ExportError::MissingSymbol {
                    path: self.path.clone(),
                    symbol: MAKE_INTEGRATOR_SYMBOL.to_string(),
                }
            })?;

        let dir = c_path(dir)?;
        let integrator_type = CString::new(request.integrator_type.as_str())
            .map_err(|e| ExportError::Interface(e.to_string()))?;
        let grid = request.grid.map_or(ptr::null(), |g| g.as_ptr());

        let status = unsafe {
            make_integrator(
                dir.as_ptr(),
                c_int_arg("num_intervals", request.num_intervals)?,
                request.timestep,
                integrator_type.as_ptr(),
                grid,
                c_int_arg("num_integrator_steps", request.num_integrator_steps)?,
                c_int_arg("nx", request.nx)?,
                c_int_arg("nz", request.nz)?,
                c_int_arg("nup", request.nup)?,
            )
        };
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_library_is_a_load_error() {
        let result = AcadoInterface::load("/nonexistent/libgenerator.so");
        assert!(matches!(result, Err(ExportError::Load { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_c_path_keeps_raw_bytes() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = Path::new(OsStr::from_bytes(b"/tmp/export-\xff\xfe"));
        assert_eq!(c_path(dir).unwrap().as_bytes(), b"/tmp/export-\xff\xfe");
        assert!(matches!(
            c_path(Path::new(OsStr::from_bytes(b"/tmp/a\0b"))),
            Err(ExportError::Interface(_))
        ));
    }

    #[test]
    fn test_c_int_overflow() {
        assert!(c_int_arg("nx", usize::MAX).is_err());
        assert_eq!(c_int_arg("nx", 7).unwrap(), 7);
    }
}
