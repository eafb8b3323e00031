use std::env;
use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::ExportError;

/// Turns the sources of a cache entry into its shared libraries
pub trait NativeCompiler: Send + Sync {
    /// Builds everything in `dir`. Must succeed without side effects when run again on an
    /// already built directory.
    fn build(&self, dir: &Path) -> Result<(), ExportError>;
}

/// Runs `make` in the entry directory, blocking until it exits
#[derive(Debug, Clone)]
pub struct Make {
    program: OsString,
}

impl Default for Make {
    fn default() -> Self {
        Self {
            program: "make".into(),
        }
    }
}

impl Make {
    pub fn with_program(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Honors the conventional `MAKE` environment variable, falling back to `make`
    pub fn from_env() -> Self {
        match env::var_os("MAKE") {
            Some(program) if !program.is_empty() => Self::with_program(program),
            _ => Self::default(),
        }
    }
}

impl NativeCompiler for Make {
    fn build(&self, dir: &Path) -> Result<(), ExportError> {
        debug!(dir = %dir.display(), "running {}", self.program.to_string_lossy());
        let status = Command::new(&self.program)
            .current_dir(dir)
            .stdin(Stdio::null())
            .status()
            .map_err(|e| ExportError::io(dir, e))?;

        if !status.success() {
            return Err(ExportError::Build {
                dir: dir.to_path_buf(),
                status: status.code(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_program_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let make = Make::with_program("definitely-not-a-make-binary");
        assert!(matches!(make.build(dir.path()), Err(ExportError::Io { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_program_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let make = Make::with_program("false");
        match make.build(dir.path()) {
            Err(ExportError::Build { status, .. }) => assert_eq!(status, Some(1)),
            other => panic!("expected build error, got {:?}", other),
        }
    }
}
