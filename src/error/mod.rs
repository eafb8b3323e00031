//! Error types for the registry, the export pipeline and the native driver

use std::path::PathBuf;

use thiserror::Error;

use crate::dae::VariableKind;

/// Errors raised by misuse of the variable registry
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DaeError {
    /// The registry layout was consumed and can no longer change
    #[error("can't add variables because the DAE has been frozen by: {by:?}")]
    Frozen { by: Vec<String> },

    /// A variable with this name already exists in some category
    #[error("name \"{name}\" is not unique, it is already a {existing} variable")]
    DuplicateName { name: String, existing: VariableKind },

    /// No variable with this name in the requested category
    #[error("\"{name}\" is not a {kind} variable")]
    UnknownName { name: String, kind: VariableKind },

    #[error("output name \"{0}\" is not unique")]
    DuplicateOutputName(String),

    #[error("\"{0}\" is not an output")]
    UnknownOutput(String),

    /// Wrong number of values passed to a symbolic function
    #[error("input '{input}' expects {expected} values, got {actual}")]
    InputLength {
        input: &'static str,
        expected: usize,
        actual: usize,
    },

    /// An expression referenced a symbol that is not an input of the function
    #[error("symbol \"{0}\" is not bound to any input")]
    UnboundSymbol(String),
}

/// Errors raised while generating, building or loading native artifacts
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Invalid integrator options: {0}")]
    InvalidOptions(String),

    /// The external integrator generator rejected its inputs
    #[error("integrator code generation failed with status {status}, check the integrator options")]
    CodeGeneration { status: i32 },

    /// The external integrator generator could not be reached
    #[error("integrator generator interface: {0}")]
    Interface(String),

    #[error("model code generation failed: {0}")]
    ModelCodegen(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The build script exited unsuccessfully; `status` is `None` when killed by a signal
    #[error("integrator compilation in {} failed, return code {status:?}", dir.display())]
    Build { dir: PathBuf, status: Option<i32> },

    #[error("failed to load {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("symbol '{symbol}' not found in {}", path.display())]
    MissingSymbol { path: PathBuf, symbol: String },
}

impl ExportError {
    /// Wrap an I/O error together with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised by the native integration driver
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    #[error("no value given for {kind} variable \"{name}\"")]
    MissingValue { kind: VariableKind, name: String },

    #[error("native integrator returned status {status}")]
    IntegrationFailed { status: i32 },

    #[error("no symbolic evaluator available for '{0}'")]
    MissingEvaluator(&'static str),

    #[error("symbolic evaluator for '{name}' returned {actual} values, expected {expected}")]
    EvaluatorLength {
        name: &'static str,
        expected: usize,
        actual: usize,
    },
}

#[derive(Error, Debug)]
pub enum DaeExportError {
    #[error(transparent)]
    Dae(#[from] DaeError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Driver(#[from] DriverError),
}
