//! Compiled integrators for differential-algebraic models.
//!
//! The pipeline goes from a symbolic model to native code and back:
//!
//! 1. declare variables and outputs in a [`Dae`](dae::Dae);
//! 2. generate the integrator, model, workspace and build sources with an
//!    [`ArtifactGenerator`](export::ArtifactGenerator);
//! 3. store and compile them in a content-addressed [`BuildCache`](cache::BuildCache);
//! 4. load the shared libraries and step the model with a
//!    [`DaeIntegrator`](native::DaeIntegrator).
//!
//! Logging goes through `tracing`; no subscriber is installed by this crate.

pub mod cache;
pub mod dae;
pub mod error;
pub mod export;
pub mod native;

pub use crate::cache::{BuildCache, CacheStatus, ExportedBuild, Make, NativeCompiler};
pub use crate::dae::{Dae, DaeLayout, Expr, VariableKind};
pub use crate::export::{
    AcadoInterface, ArtifactGenerator, ArtifactSet, IntegratorCodegen, IntegratorOptions,
    IntegratorType, ModelCodegen, ModelSource, SymbolicEvaluators,
};
pub use crate::native::{DaeIntegrator, NamedValues, NativeRoutines, StateLayout};
pub use error::{DaeError, DaeExportError, DriverError, ExportError};
pub use std::collections::HashMap;
