use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use super::artifacts::{ArtifactSet, HEADER, INTEGRATOR_SOURCE};
use super::options::{IntegratorOptions, IntegratorType};
use crate::dae::Dae;
use crate::error::ExportError;

/// Timestep handed to the integrator generator. The model source scales `xdot` by the real
/// timestep, so the integrator always advances one unit of normalized time.
pub const NORMALIZED_TIMESTEP: f64 = 1.0;

/// Everything the external integrator generator needs to know about a model
#[derive(Debug, Clone, PartialEq)]
pub struct IntegratorRequest<'a> {
    pub nx: usize,
    pub nz: usize,
    /// Number of controls plus parameters
    pub nup: usize,
    pub num_intervals: usize,
    pub timestep: f64,
    pub integrator_type: IntegratorType,
    pub grid: Option<&'a [f64]>,
    pub num_integrator_steps: usize,
}

/// Produces `integrator.c` and `acado.h` for a model
pub trait IntegratorCodegen {
    /// Writes both files into `dir` and returns the generator's status, zero on success
    fn export(&self, dir: &Path, request: &IntegratorRequest<'_>) -> Result<i32, ExportError>;
}

/// Numeric twin of a compiled model routine, taking the packed `[x|z|u|p|xdot]` input
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, input: &[f64]) -> Vec<f64>;
}

impl<F> Evaluator for F
where
    F: Fn(&[f64]) -> Vec<f64> + Send + Sync,
{
    fn evaluate(&self, input: &[f64]) -> Vec<f64> {
        self(input)
    }
}

/// In-memory evaluators returned alongside the model source
#[derive(Clone, Default)]
pub struct SymbolicEvaluators {
    pub rhs: Option<Arc<dyn Evaluator>>,
    pub rhs_jacobian: Option<Arc<dyn Evaluator>>,
}

impl fmt::Debug for SymbolicEvaluators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolicEvaluators")
            .field("rhs", &self.rhs.is_some())
            .field("rhs_jacobian", &self.rhs_jacobian.is_some())
            .finish()
    }
}

/// Output of a [`ModelCodegen`]
#[derive(Debug, Clone)]
pub struct ModelSource {
    /// C source defining `rhs` and `rhs_jac`
    pub source: String,
    pub evaluators: SymbolicEvaluators,
}

/// Produces the C source of a model's residual and its Jacobian
pub trait ModelCodegen {
    fn generate(&self, dae: &Dae, timestep: f64) -> Result<ModelSource, ExportError>;
}

/// A generated artifact set plus the evaluators kept for cross-checking
#[derive(Debug, Clone)]
pub struct GeneratedModel {
    pub artifacts: ArtifactSet,
    pub evaluators: SymbolicEvaluators,
}

/// Drives both code generators and assembles the artifact set
pub struct ArtifactGenerator<'a> {
    integrator: &'a dyn IntegratorCodegen,
    model: &'a dyn ModelCodegen,
}

impl<'a> ArtifactGenerator<'a> {
    pub fn new(integrator: &'a dyn IntegratorCodegen, model: &'a dyn ModelCodegen) -> Self {
        Self { integrator, model }
    }

    /// Generates the artifact set for `dae`. The model is frozen first, since the generated
    /// code bakes in its variable layout.
    pub fn generate(
        &self,
        dae: &mut Dae,
        options: &IntegratorOptions,
    ) -> Result<GeneratedModel, ExportError> {
        dae.freeze("export");
        let (nx, nz, nu, np) = dae.counts();

        let request = IntegratorRequest {
            nx,
            nz,
            nup: nu + np,
            num_intervals: options.num_intervals(),
            timestep: NORMALIZED_TIMESTEP,
            integrator_type: options.integrator_type(),
            grid: options.integrator_grid(),
            num_integrator_steps: options.num_integrator_steps(),
        };
        let (integrator, header) = self.generate_integrator(&request)?;

        let model = self.model.generate(dae, options.timestep())?;
        debug!(
            nx,
            nz,
            nu,
            np,
            integrator_type = %options.integrator_type(),
            "generated integrator and model sources"
        );

        Ok(GeneratedModel {
            artifacts: ArtifactSet::from_sources(integrator, header, model.source),
            evaluators: model.evaluators,
        })
    }

    /// Runs the integrator generator in a scratch directory and reads its two files back.
    /// The scratch directory is removed on every path out of this function.
    fn generate_integrator(
        &self,
        request: &IntegratorRequest<'_>,
    ) -> Result<(String, String), ExportError> {
        let scratch = tempfile::Builder::new()
            .prefix("daexport-")
            .tempdir()
            .map_err(|e| ExportError::io(std::env::temp_dir(), e))?;

        let status = self.integrator.export(scratch.path(), request)?;
        if status != 0 {
            return Err(ExportError::CodeGeneration { status });
        }

        let read = |name: &str| {
            let path = scratch.path().join(name);
            fs::read_to_string(&path).map_err(|e| ExportError::io(path, e))
        };
        let integrator = read(INTEGRATOR_SOURCE)?;
        let header = read(HEADER)?;

        let scratch_path = scratch.path().to_path_buf();
        scratch
            .close()
            .map_err(|e| ExportError::io(scratch_path, e))?;
        Ok((integrator, header))
    }
}
