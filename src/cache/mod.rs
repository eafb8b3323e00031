//! Content-addressed storage and compilation of exported integrators.
//!
//! Every [`ArtifactSet`] is stored under `<root>/<digest>/`, where `digest` is the SHA-256 of
//! the artifacts. Exporting the same artifacts twice reuses the directory and only re-runs
//! the (idempotent) build. If a directory exists but its files differ from the artifacts
//! being exported, this is treated as a hash collision: the entry is wiped, rewritten and
//! rebuilt, and the collision is reported through a warning and [`CacheStatus`].
//!
//! New entries are built in a staging directory next to their final location and renamed
//! into place once the build succeeded, so an entry directory never holds a partial export.

pub mod compiler;

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use lazy_static::lazy_static;
use tracing::{debug, info, warn};

use crate::error::ExportError;
use crate::export::templates::{INTEGRATOR_LIB, MODEL_LIB};
use crate::export::ArtifactSet;
use crate::native::NativeRoutines;
pub use compiler::{Make, NativeCompiler};

/// Environment variable overriding the cache root
pub const CACHE_DIR_ENV: &str = "DAEXPORT_CACHE_DIR";

/// Staging directories untouched for this long belong to a build that will not finish
pub const STALE_STAGING_AGE: Duration = Duration::from_secs(60 * 60);

lazy_static! {
    // Serializes exports of the same entry within this process
    static ref ENTRY_LOCKS: DashMap<PathBuf, Arc<Mutex<()>>> = DashMap::new();
}

/// Default cache root: `DAEXPORT_CACHE_DIR` if set, else `~/.daexport`.
///
/// The home directory is taken from `HOME` or `USERPROFILE`; without either the system
/// temporary directory is used.
pub fn default_root() -> PathBuf {
    if let Some(dir) = env::var_os(CACHE_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }

    let home = env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .unwrap_or_default();
    if home.is_empty() {
        env::temp_dir().join("daexport")
    } else {
        PathBuf::from(home).join(".daexport")
    }
}

/// How an export was satisfied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheStatus {
    /// No entry existed; it was written and built
    Fresh,
    /// An identical entry existed; it was rebuilt in place
    Reused,
    /// An entry with the same digest but different content was overwritten
    CollisionRecovered { mismatched: Vec<String> },
}

/// A built cache entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedBuild {
    pub dir: PathBuf,
    pub digest: String,
    pub status: CacheStatus,
}

impl ExportedBuild {
    pub fn model_library(&self) -> PathBuf {
        self.dir.join(MODEL_LIB)
    }

    pub fn integrator_library(&self) -> PathBuf {
        self.dir.join(INTEGRATOR_LIB)
    }

    /// Loads the compiled routines of this entry.
    ///
    /// # Safety
    ///
    /// Same contract as [`NativeRoutines::load`]: the routines must only be driven with the
    /// layout of the model these artifacts were generated from.
    pub unsafe fn load(&self) -> Result<NativeRoutines, ExportError> {
        unsafe { load(&self.dir) }
    }
}

/// Loads `rhs`, `rhs_jac` and `integrate` from a built entry directory.
///
/// # Safety
///
/// See [`NativeRoutines::load`].
///
/// ```compile_fail
/// # fn f(dir: &std::path::Path) {
/// let _ = daexport::cache::load(dir);
/// # }
/// ```
pub unsafe fn load(dir: &Path) -> Result<NativeRoutines, ExportError> {
    unsafe { NativeRoutines::load(dir) }
}

enum Published {
    Done,
    /// Another process renamed its entry into place first
    LostRace,
}

/// A directory of built exports, keyed by artifact digest
pub struct BuildCache {
    root: PathBuf,
    compiler: Box<dyn NativeCompiler>,
}

impl std::fmt::Debug for BuildCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildCache")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl Default for BuildCache {
    fn default() -> Self {
        Self::new(default_root(), Make::from_env())
    }
}

impl BuildCache {
    pub fn new(root: impl Into<PathBuf>, compiler: impl NativeCompiler + 'static) -> Self {
        Self {
            root: root.into(),
            compiler: Box::new(compiler),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_dir(&self, digest: &str) -> PathBuf {
        self.root.join(digest)
    }

    /// Stores and builds `artifacts`, reusing an existing entry when its content matches
    pub fn export_and_build(&self, artifacts: &ArtifactSet) -> Result<ExportedBuild, ExportError> {
        let digest = artifacts.digest();
        let dir = self.entry_dir(&digest);
        info!("integrator export path: {}", dir.display());

        fs::create_dir_all(&self.root).map_err(|e| ExportError::io(&self.root, e))?;

        let lock = ENTRY_LOCKS
            .entry(dir.clone())
            .or_default()
            .value()
            .clone();
        let status = {
            let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            self.sweep_staging(&digest, STALE_STAGING_AGE)
                .and_then(|_| self.export_locked(&dir, &digest, artifacts))
        };
        drop(lock);
        // Only the map holds the mutex once no other export of this entry is in flight
        ENTRY_LOCKS.remove_if(&dir, |_, lock| Arc::strong_count(lock) == 1);

        Ok(ExportedBuild {
            dir,
            digest,
            status: status?,
        })
    }

    fn export_locked(
        &self,
        dir: &Path,
        digest: &str,
        artifacts: &ArtifactSet,
    ) -> Result<CacheStatus, ExportError> {
        if dir.exists() {
            return self.refresh(dir, artifacts);
        }
        match self.publish(dir, digest, artifacts)? {
            Published::Done => Ok(CacheStatus::Fresh),
            Published::LostRace => self.refresh(dir, artifacts),
        }
    }

    /// Removes staging directories of `digest` older than `older_than`, left behind by
    /// processes that died mid-build. Returns how many were removed.
    pub fn sweep_staging(&self, digest: &str, older_than: Duration) -> Result<usize, ExportError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(ExportError::io(&self.root, e)),
        };
        let prefix = staging_prefix(digest);
        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|e| ExportError::io(&self.root, e))?;
            if !entry.file_name().to_string_lossy().starts_with(&prefix) {
                continue;
            }
            let age = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| SystemTime::now().duration_since(modified).ok())
                .unwrap_or_default();
            if age < older_than {
                continue;
            }
            let path = entry.path();
            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "removed stale staging directory");
                    removed += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(ExportError::io(path, e)),
            }
        }
        Ok(removed)
    }

    /// Removes an entry and its stale staging directories. Returns whether the entry existed.
    pub fn clean(&self, digest: &str) -> Result<bool, ExportError> {
        self.sweep_staging(digest, STALE_STAGING_AGE)?;
        let dir = self.entry_dir(digest);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ExportError::io(dir, e)),
        }
    }

    /// Builds a new entry in a staging directory and renames it into place
    fn publish(
        &self,
        dir: &Path,
        digest: &str,
        artifacts: &ArtifactSet,
    ) -> Result<Published, ExportError> {
        let staging = tempfile::Builder::new()
            .prefix(&staging_prefix(digest))
            .tempdir_in(&self.root)
            .map_err(|e| ExportError::io(&self.root, e))?;

        write_artifacts(staging.path(), artifacts)?;
        self.compiler.build(staging.path())?;

        // After a successful rename the staging path is gone and dropping `staging` is a no-op
        match fs::rename(staging.path(), dir) {
            Ok(()) => {
                debug!(digest, "built new cache entry");
                Ok(Published::Done)
            }
            Err(_) if dir.exists() => {
                debug!(digest, "cache entry appeared while building, verifying it");
                Ok(Published::LostRace)
            }
            Err(e) => Err(ExportError::io(dir, e)),
        }
    }

    /// Rebuilds an existing entry, overwriting it first if its content differs
    fn refresh(&self, dir: &Path, artifacts: &ArtifactSet) -> Result<CacheStatus, ExportError> {
        let mismatched = mismatched_files(dir, artifacts);
        if mismatched.is_empty() {
            debug!(dir = %dir.display(), "cache hit, running build");
            self.compiler.build(dir)?;
            return Ok(CacheStatus::Reused);
        }

        warn!(
            dir = %dir.display(),
            ?mismatched,
            "hash collision: cached files differ from the generated ones, rewriting entry"
        );
        clear_dir(dir)?;
        write_artifacts(dir, artifacts)?;
        self.compiler.build(dir)?;
        Ok(CacheStatus::CollisionRecovered { mismatched })
    }
}

fn staging_prefix(digest: &str) -> String {
    format!(".{}-", digest)
}

/// Artifacts whose on-disk copy is missing, unreadable or different
fn mismatched_files(dir: &Path, artifacts: &ArtifactSet) -> Vec<String> {
    artifacts
        .iter()
        .filter(|(name, content)| match fs::read(dir.join(name)) {
            Ok(on_disk) => on_disk != content.as_bytes(),
            Err(_) => true,
        })
        .map(|(name, _)| name.to_string())
        .collect()
}

fn write_artifacts(dir: &Path, artifacts: &ArtifactSet) -> Result<(), ExportError> {
    for (name, content) in artifacts.iter() {
        let path = dir.join(name);
        fs::write(&path, content).map_err(|e| ExportError::io(path, e))?;
    }
    Ok(())
}

fn clear_dir(dir: &Path) -> Result<(), ExportError> {
    let entries = fs::read_dir(dir).map_err(|e| ExportError::io(dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| ExportError::io(dir, e))?.path();
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|e| ExportError::io(path, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopCompiler;

    impl NativeCompiler for NoopCompiler {
        fn build(&self, _dir: &Path) -> Result<(), ExportError> {
            Ok(())
        }
    }

    struct FailingCompiler;

    impl NativeCompiler for FailingCompiler {
        fn build(&self, dir: &Path) -> Result<(), ExportError> {
            Err(ExportError::Build {
                dir: dir.to_path_buf(),
                status: Some(2),
            })
        }
    }

    fn artifacts() -> ArtifactSet {
        ArtifactSet::from_sources("int".into(), "hdr".into(), "mdl".into())
    }

    #[test]
    fn test_mismatched_files_reports_missing_and_changed() {
        let dir = tempfile::tempdir().unwrap();
        write_artifacts(dir.path(), &artifacts()).unwrap();
        assert!(mismatched_files(dir.path(), &artifacts()).is_empty());

        fs::write(dir.path().join("model.c"), "mdL").unwrap();
        fs::remove_file(dir.path().join("acado.h")).unwrap();
        assert_eq!(mismatched_files(dir.path(), &artifacts()), ["acado.h", "model.c"]);
    }

    #[test]
    fn test_clear_dir_keeps_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_artifacts(dir.path(), &artifacts()).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        clear_dir(dir.path()).unwrap();
        assert!(dir.path().exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_no_staging_left_behind() {
        let root = tempfile::tempdir().unwrap();
        let cache = BuildCache::new(root.path(), NoopCompiler);
        let build = cache.export_and_build(&artifacts()).unwrap();
        let entries: Vec<_> = fs::read_dir(root.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, [std::ffi::OsString::from(&build.digest)]);
    }

    #[test]
    fn test_entry_lock_released_after_export() {
        let root = tempfile::tempdir().unwrap();
        let cache = BuildCache::new(root.path(), NoopCompiler);
        let build = cache.export_and_build(&artifacts()).unwrap();
        assert!(!ENTRY_LOCKS.contains_key(&build.dir));

        let failing = BuildCache::new(root.path().join("other"), FailingCompiler);
        let dir = failing.entry_dir(&artifacts().digest());
        assert!(failing.export_and_build(&artifacts()).is_err());
        assert!(!ENTRY_LOCKS.contains_key(&dir));
    }

    #[test]
    fn test_sweep_staging_respects_age_and_digest() {
        let root = tempfile::tempdir().unwrap();
        let cache = BuildCache::new(root.path(), NoopCompiler);
        let digest = artifacts().digest();
        let stale = root.path().join(format!(".{}-crashed", digest));
        let unrelated = root.path().join(".0000-crashed");
        fs::create_dir_all(stale.join("nested")).unwrap();
        fs::create_dir(&unrelated).unwrap();

        assert_eq!(cache.sweep_staging(&digest, STALE_STAGING_AGE).unwrap(), 0);
        assert!(stale.exists());

        assert_eq!(cache.sweep_staging(&digest, Duration::ZERO).unwrap(), 1);
        assert!(!stale.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn test_sweep_staging_without_root() {
        let root = tempfile::tempdir().unwrap();
        let cache = BuildCache::new(root.path().join("missing"), NoopCompiler);
        assert_eq!(cache.sweep_staging("abc", Duration::ZERO).unwrap(), 0);
    }

    #[test]
    fn test_clean() {
        let root = tempfile::tempdir().unwrap();
        let cache = BuildCache::new(root.path(), NoopCompiler);
        let build = cache.export_and_build(&artifacts()).unwrap();
        assert!(cache.clean(&build.digest).unwrap());
        assert!(!cache.clean(&build.digest).unwrap());
        assert!(!build.dir.exists());
    }
}
