use std::collections::HashMap;

use nalgebra::DMatrix;
use tracing::debug;

use super::layout::StateLayout;
use super::load::NativeRoutines;
use crate::cache::{BuildCache, ExportedBuild};
use crate::dae::{Dae, DaeLayout, VariableKind};
use crate::error::{DaeExportError, DriverError};
use crate::export::{ArtifactGenerator, IntegratorOptions, SymbolicEvaluators};

/// Values keyed by variable name
pub type NamedValues = HashMap<String, f64>;

fn gather(
    layout: &DaeLayout,
    kind: VariableKind,
    values: &NamedValues,
) -> Result<Vec<f64>, DriverError> {
    layout
        .names(kind)
        .iter()
        .map(|name| {
            values
                .get(name)
                .copied()
                .ok_or_else(|| DriverError::MissingValue {
                    kind,
                    name: name.clone(),
                })
        })
        .collect()
}

/// A compiled integrator for one model.
///
/// Owns the integration state buffer exchanged with the native `integrate` routine. The
/// first [`step`](Self::step) is a cold start; every later one warm-starts from what the
/// previous step left in the buffer (algebraic variables and sensitivities included) until
/// [`reset`](Self::reset) is called.
#[derive(Debug)]
pub struct DaeIntegrator {
    layout: DaeLayout,
    offsets: StateLayout,
    routines: NativeRoutines,
    buffer: Vec<f64>,
    cold_start: bool,
    evaluators: SymbolicEvaluators,
    build: Option<ExportedBuild>,
}

impl DaeIntegrator {
    /// Generates, builds (or reuses) and loads the integrator for `dae`
    pub fn new(
        dae: &mut Dae,
        options: &IntegratorOptions,
        generator: &ArtifactGenerator<'_>,
        cache: &BuildCache,
    ) -> Result<Self, DaeExportError> {
        let generated = generator.generate(dae, options)?;
        let build = cache.export_and_build(&generated.artifacts)?;
        // The entry was generated from this frozen model, so its layout matches the libraries
        let mut integrator = unsafe {
            let routines = build.load()?;
            Self::from_routines(dae.layout(), routines, generated.evaluators)
        };
        integrator.build = Some(build);
        Ok(integrator)
    }

    /// Wraps already loaded routines compiled for `layout`.
    ///
    /// # Safety
    ///
    /// `routines` must have been compiled for exactly this layout: `integrate` accesses
    /// [`StateLayout::len`] values of the state buffer and `rhs`/`rhs_jac` the matching input
    /// and output lengths. A layout of another model makes them read and write out of bounds.
    ///
    /// ```compile_fail
    /// use daexport::{DaeIntegrator, DaeLayout, NativeRoutines, SymbolicEvaluators};
    ///
    /// fn wrap(layout: DaeLayout, routines: NativeRoutines) -> DaeIntegrator {
    ///     DaeIntegrator::from_routines(layout, routines, SymbolicEvaluators::default())
    /// }
    /// ```
    pub unsafe fn from_routines(
        layout: DaeLayout,
        routines: NativeRoutines,
        evaluators: SymbolicEvaluators,
    ) -> Self {
        let offsets = StateLayout::from(&layout);
        Self {
            buffer: vec![0.0; offsets.len()],
            layout,
            offsets,
            routines,
            cold_start: true,
            evaluators,
            build: None,
        }
    }

    pub fn layout(&self) -> &DaeLayout {
        &self.layout
    }

    pub fn offsets(&self) -> StateLayout {
        self.offsets
    }

    /// The cache entry the routines were loaded from
    pub fn build(&self) -> Option<&ExportedBuild> {
        self.build.as_ref()
    }

    /// The raw integration state buffer
    pub fn buffer(&self) -> &[f64] {
        &self.buffer
    }

    pub fn is_cold_start(&self) -> bool {
        self.cold_start
    }

    /// Makes the next step a cold start again
    pub fn reset(&mut self) {
        self.cold_start = true;
    }

    /// Current algebraic variables, as left by the last step
    pub fn algebraic(&self) -> NamedValues {
        self.named(VariableKind::Algebraic, self.offsets.algebraic())
    }

    fn named(&self, kind: VariableKind, range: std::ops::Range<usize>) -> NamedValues {
        self.layout
            .names(kind)
            .iter()
            .cloned()
            .zip(self.buffer[range].iter().copied())
            .collect()
    }

    fn pack_rhs_input(
        &self,
        xdot: &NamedValues,
        x: &NamedValues,
        z: &NamedValues,
        u: &NamedValues,
        p: &NamedValues,
    ) -> Result<Vec<f64>, DriverError> {
        let mut input = Vec::with_capacity(self.offsets.rhs_input_len());
        input.extend(gather(&self.layout, VariableKind::State, x)?);
        input.extend(gather(&self.layout, VariableKind::Algebraic, z)?);
        input.extend(gather(&self.layout, VariableKind::Control, u)?);
        input.extend(gather(&self.layout, VariableKind::Parameter, p)?);
        input.extend(gather(&self.layout, VariableKind::State, xdot)?);
        Ok(input)
    }

    /// Evaluates the model residual, `nx + nz` values
    pub fn rhs(
        &self,
        xdot: &NamedValues,
        x: &NamedValues,
        z: &NamedValues,
        u: &NamedValues,
        p: &NamedValues,
    ) -> Result<Vec<f64>, DriverError> {
        let input = self.pack_rhs_input(xdot, x, z, u, p)?;
        let mut output = vec![0.0; self.offsets.rhs_output_len()];
        unsafe { self.routines.rhs(&input, &mut output) };
        Ok(output)
    }

    /// Evaluates the residual Jacobian with respect to `[x|z|u|p|xdot]`, flattened row by row
    pub fn rhs_jacobian(
        &self,
        xdot: &NamedValues,
        x: &NamedValues,
        z: &NamedValues,
        u: &NamedValues,
        p: &NamedValues,
    ) -> Result<Vec<f64>, DriverError> {
        let input = self.pack_rhs_input(xdot, x, z, u, p)?;
        let mut output = vec![0.0; self.offsets.jacobian_len()];
        unsafe { self.routines.rhs_jac(&input, &mut output) };
        Ok(output)
    }

    /// [`rhs_jacobian`](Self::rhs_jacobian) as an `(nx+nz) x (2nx+nz+nu+np)` matrix
    pub fn rhs_jacobian_matrix(
        &self,
        xdot: &NamedValues,
        x: &NamedValues,
        z: &NamedValues,
        u: &NamedValues,
        p: &NamedValues,
    ) -> Result<DMatrix<f64>, DriverError> {
        let flat = self.rhs_jacobian(xdot, x, z, u, p)?;
        Ok(DMatrix::from_row_slice(
            self.offsets.rhs_output_len(),
            self.offsets.rhs_input_len(),
            &flat,
        ))
    }

    /// Native residual minus the symbolic one, for checking the generated code
    pub fn compare_rhs(
        &self,
        xdot: &NamedValues,
        x: &NamedValues,
        z: &NamedValues,
        u: &NamedValues,
        p: &NamedValues,
    ) -> Result<Vec<f64>, DriverError> {
        let evaluator = self
            .evaluators
            .rhs
            .as_ref()
            .ok_or(DriverError::MissingEvaluator("rhs"))?;
        let native = self.rhs(xdot, x, z, u, p)?;
        let symbolic = evaluator.evaluate(&self.pack_rhs_input(xdot, x, z, u, p)?);
        difference("rhs", &native, &symbolic)
    }

    /// Native Jacobian minus the symbolic one
    pub fn compare_rhs_jacobian(
        &self,
        xdot: &NamedValues,
        x: &NamedValues,
        z: &NamedValues,
        u: &NamedValues,
        p: &NamedValues,
    ) -> Result<Vec<f64>, DriverError> {
        let evaluator = self
            .evaluators
            .rhs_jacobian
            .as_ref()
            .ok_or(DriverError::MissingEvaluator("rhs_jacobian"))?;
        let native = self.rhs_jacobian(xdot, x, z, u, p)?;
        let symbolic = evaluator.evaluate(&self.pack_rhs_input(xdot, x, z, u, p)?);
        difference("rhs_jacobian", &native, &symbolic)
    }

    /// Integrates over one timestep from `x` with controls `u` and parameters `p`.
    ///
    /// Algebraic variables are not inputs: they start from whatever the previous step left in
    /// the buffer. On failure the buffer may hold partial results and the next step is still a
    /// cold start if no step has succeeded yet.
    pub fn step(
        &mut self,
        x: &NamedValues,
        u: &NamedValues,
        p: &NamedValues,
    ) -> Result<NamedValues, DriverError> {
        let x = gather(&self.layout, VariableKind::State, x)?;
        let u = gather(&self.layout, VariableKind::Control, u)?;
        let p = gather(&self.layout, VariableKind::Parameter, p)?;

        self.buffer[self.offsets.state()].copy_from_slice(&x);
        self.buffer[self.offsets.control()].copy_from_slice(&u);
        self.buffer[self.offsets.parameters()].copy_from_slice(&p);

        let status = unsafe { self.routines.integrate(&mut self.buffer, self.cold_start) };
        if status != 0 {
            return Err(DriverError::IntegrationFailed { status });
        }
        self.cold_start = false;

        Ok(self.named(VariableKind::State, self.offsets.state()))
    }
}

fn difference(
    name: &'static str,
    native: &[f64],
    symbolic: &[f64],
) -> Result<Vec<f64>, DriverError> {
    if native.len() != symbolic.len() {
        return Err(DriverError::EvaluatorLength {
            name,
            expected: native.len(),
            actual: symbolic.len(),
        });
    }
    let diff: Vec<f64> = native.iter().zip(symbolic).map(|(a, b)| a - b).collect();
    let max_abs = diff.iter().fold(0.0_f64, |m, d| m.max(d.abs()));
    debug!(name, max_abs, "native vs symbolic difference");
    Ok(diff)
}
