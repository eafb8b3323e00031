//! Generation of the native sources of an integrator.
//!
//! An export is made of five files: the integrator source and its header (written by the
//! external integrator generator), the model source (written by a [`ModelCodegen`]), a fixed
//! workspace source and a build script. Together they form an [`ArtifactSet`], which the
//! [`cache`](crate::cache) module stores and compiles.

pub mod artifacts;
pub mod generate;
pub mod interface;
pub mod options;
pub mod templates;

pub use artifacts::{ArtifactSet, ARTIFACT_FILES};
pub use generate::{
    ArtifactGenerator, Evaluator, GeneratedModel, IntegratorCodegen, IntegratorRequest,
    ModelCodegen, ModelSource, SymbolicEvaluators, NORMALIZED_TIMESTEP,
};
pub use interface::AcadoInterface;
pub use options::{IntegratorOptions, IntegratorType};
