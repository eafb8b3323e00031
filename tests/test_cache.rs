//! Integration tests for artifact generation and the content-addressed build cache

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use daexport::cache::{BuildCache, CacheStatus, NativeCompiler};
use daexport::export::templates::{INTEGRATOR_LIB, MODEL_LIB};
use daexport::export::{
    ArtifactGenerator, ArtifactSet, IntegratorCodegen, IntegratorOptions, IntegratorRequest,
    IntegratorType, ModelCodegen, ModelSource, SymbolicEvaluators, ARTIFACT_FILES,
};
use daexport::{Dae, ExportError};

/// Pretends to compile by dropping placeholder libraries next to the sources
#[derive(Clone, Default)]
struct FakeCompiler {
    builds: Arc<AtomicUsize>,
    fail_with: Option<i32>,
}

impl FakeCompiler {
    fn failing(status: i32) -> Self {
        Self {
            builds: Arc::default(),
            fail_with: Some(status),
        }
    }

    fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl NativeCompiler for FakeCompiler {
    fn build(&self, dir: &Path) -> Result<(), ExportError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.fail_with {
            return Err(ExportError::Build {
                dir: dir.to_path_buf(),
                status: Some(status),
            });
        }
        for lib in [MODEL_LIB, INTEGRATOR_LIB] {
            let path = dir.join(lib);
            if !path.exists() {
                fs::write(path, "binary").unwrap();
            }
        }
        Ok(())
    }
}

fn artifacts(model: &str) -> ArtifactSet {
    ArtifactSet::from_sources(
        "int integrate(double *b, int c) { return 0; }".into(),
        "typedef int ACADOworkspace;".into(),
        model.into(),
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Export and reuse
// ═══════════════════════════════════════════════════════════════════════════════

mod export {
    use super::*;

    #[test]
    fn test_fresh_export_writes_everything() {
        let root = tempfile::tempdir().unwrap();
        let compiler = FakeCompiler::default();
        let cache = BuildCache::new(root.path().join("nested/cache"), compiler.clone());
        let set = artifacts("void rhs() {}");

        let build = cache.export_and_build(&set).unwrap();
        assert_eq!(build.status, CacheStatus::Fresh);
        assert_eq!(build.digest, set.digest());
        assert_eq!(build.dir, cache.entry_dir(&set.digest()));
        for (name, content) in set.iter() {
            assert_eq!(fs::read_to_string(build.dir.join(name)).unwrap(), content);
        }
        assert!(build.model_library().exists());
        assert!(build.integrator_library().exists());
        assert_eq!(compiler.builds(), 1);
    }

    #[test]
    fn test_second_export_rebuilds_without_rewriting() {
        let root = tempfile::tempdir().unwrap();
        let compiler = FakeCompiler::default();
        let cache = BuildCache::new(root.path(), compiler.clone());
        let set = artifacts("void rhs() {}");

        let first = cache.export_and_build(&set).unwrap();
        // Anything not in the artifact set would be wiped by a rewrite
        fs::write(first.dir.join("stamp"), "kept").unwrap();

        let second = cache.export_and_build(&set).unwrap();
        assert_eq!(second.status, CacheStatus::Reused);
        assert_eq!(second.dir, first.dir);
        assert_eq!(compiler.builds(), 2);
        assert_eq!(fs::read_to_string(second.dir.join("stamp")).unwrap(), "kept");
    }

    #[test]
    fn test_different_artifacts_get_different_entries() {
        let root = tempfile::tempdir().unwrap();
        let cache = BuildCache::new(root.path(), FakeCompiler::default());
        let a = cache.export_and_build(&artifacts("a")).unwrap();
        let b = cache.export_and_build(&artifacts("b")).unwrap();
        assert_ne!(a.dir, b.dir);
        assert_eq!(b.status, CacheStatus::Fresh);
    }

    #[test]
    fn test_concurrent_exports_share_one_entry() {
        let root = tempfile::tempdir().unwrap();
        let compiler = FakeCompiler::default();
        let cache = BuildCache::new(root.path(), compiler.clone());
        let set = artifacts("void rhs() {}");

        let statuses: Vec<CacheStatus> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(|| cache.export_and_build(&set).unwrap().status))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let fresh = statuses.iter().filter(|s| **s == CacheStatus::Fresh).count();
        let reused = statuses.iter().filter(|s| **s == CacheStatus::Reused).count();
        assert_eq!((fresh, reused), (1, 3));
        assert_eq!(compiler.builds(), 4);
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Collisions and failures
// ═══════════════════════════════════════════════════════════════════════════════

mod collisions {
    use super::*;

    #[test]
    fn test_corrupted_entry_is_rewritten() {
        let root = tempfile::tempdir().unwrap();
        let compiler = FakeCompiler::default();
        let cache = BuildCache::new(root.path(), compiler.clone());
        let set = artifacts("void rhs() {}");

        let first = cache.export_and_build(&set).unwrap();
        let model_path = first.dir.join("model.c");
        let mut bytes = fs::read(&model_path).unwrap();
        bytes[0] ^= 0x01;
        fs::write(&model_path, bytes).unwrap();
        fs::write(first.dir.join("stamp"), "stale").unwrap();

        let second = cache.export_and_build(&set).unwrap();
        assert_eq!(
            second.status,
            CacheStatus::CollisionRecovered {
                mismatched: vec!["model.c".to_string()]
            }
        );
        assert!(!second.dir.join("stamp").exists());
        for (name, content) in set.iter() {
            assert_eq!(fs::read_to_string(second.dir.join(name)).unwrap(), content);
        }
        assert!(second.model_library().exists());
        assert_eq!(compiler.builds(), 2);

        // The repaired entry is a plain cache hit again
        let third = cache.export_and_build(&set).unwrap();
        assert_eq!(third.status, CacheStatus::Reused);
    }

    #[test]
    fn test_partial_entry_from_crashed_run() {
        let root = tempfile::tempdir().unwrap();
        let cache = BuildCache::new(root.path(), FakeCompiler::default());
        let set = artifacts("void rhs() {}");

        let dir = cache.entry_dir(&set.digest());
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("integrator.c"), set.get("integrator.c").unwrap()).unwrap();
        fs::write(dir.join("acado.h"), "trunc").unwrap();

        let build = cache.export_and_build(&set).unwrap();
        match build.status {
            CacheStatus::CollisionRecovered { mismatched } => {
                assert_eq!(mismatched, ["acado.h", "model.c", "workspace.c", "Makefile"]);
            }
            other => panic!("expected collision recovery, got {:?}", other),
        }
        for name in ARTIFACT_FILES {
            assert!(dir.join(name).exists());
        }
    }

    #[test]
    fn test_failed_first_build_leaves_no_entry() {
        let root = tempfile::tempdir().unwrap();
        let cache = BuildCache::new(root.path(), FakeCompiler::failing(2));
        let set = artifacts("void rhs() {}");

        let result = cache.export_and_build(&set);
        assert!(matches!(
            result,
            Err(ExportError::Build { status: Some(2), .. })
        ));
        assert!(!cache.entry_dir(&set.digest()).exists());
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_failed_rebuild_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let set = artifacts("void rhs() {}");
        BuildCache::new(root.path(), FakeCompiler::default())
            .export_and_build(&set)
            .unwrap();

        let failing = BuildCache::new(root.path(), FakeCompiler::failing(1));
        assert!(matches!(
            failing.export_and_build(&set),
            Err(ExportError::Build { .. })
        ));
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Generation feeding the cache
// ═══════════════════════════════════════════════════════════════════════════════

mod pipeline {
    use super::*;

    struct TemplateIntegrator;

    impl IntegratorCodegen for TemplateIntegrator {
        fn export(&self, dir: &Path, req: &IntegratorRequest<'_>) -> Result<i32, ExportError> {
            if !req.integrator_type.is_implicit() && req.nz > 0 {
                return Ok(1);
            }
            let source = format!(
                "/* {} nx={} nz={} nup={} steps={} intervals={} */",
                req.integrator_type,
                req.nx,
                req.nz,
                req.nup,
                req.num_integrator_steps,
                req.num_intervals
            );
            fs::write(dir.join("integrator.c"), source)
                .map_err(|e| ExportError::io(dir, e))?;
            fs::write(dir.join("acado.h"), "/* header */")
                .map_err(|e| ExportError::io(dir, e))?;
            Ok(0)
        }
    }

    struct NamesModel;

    impl ModelCodegen for NamesModel {
        fn generate(&self, dae: &Dae, timestep: f64) -> Result<ModelSource, ExportError> {
            Ok(ModelSource {
                source: format!("/* x={:?} z={:?} ts={} */", dae.x_names(), dae.z_names(), timestep),
                evaluators: SymbolicEvaluators::default(),
            })
        }
    }

    fn pendulum() -> Dae {
        let mut dae = Dae::new();
        dae.add_x_many(&["x", "y", "dx", "dy"]).unwrap();
        dae.add_z("tension").unwrap();
        dae.add_u("torque").unwrap();
        dae.add_p_many(&["m", "l"]).unwrap();
        dae
    }

    #[test]
    fn test_same_model_and_options_hit_the_same_entry() {
        let root = tempfile::tempdir().unwrap();
        let compiler = FakeCompiler::default();
        let cache = BuildCache::new(root.path(), compiler.clone());
        let generator = ArtifactGenerator::new(&TemplateIntegrator, &NamesModel);
        let opts = IntegratorOptions::new(0.02).unwrap();

        let first = generator.generate(&mut pendulum(), &opts).unwrap();
        let second = generator.generate(&mut pendulum(), &opts).unwrap();
        assert_eq!(first.artifacts, second.artifacts);

        let a = cache.export_and_build(&first.artifacts).unwrap();
        let b = cache.export_and_build(&second.artifacts).unwrap();
        assert_eq!(a.dir, b.dir);
        assert_eq!(b.status, CacheStatus::Reused);
    }

    #[test]
    fn test_options_change_the_digest() {
        let generator = ArtifactGenerator::new(&TemplateIntegrator, &NamesModel);
        let base = IntegratorOptions::new(0.02).unwrap();
        let more_steps = base.clone().with_num_integrator_steps(20).unwrap();

        let a = generator.generate(&mut pendulum(), &base).unwrap();
        let b = generator.generate(&mut pendulum(), &more_steps).unwrap();
        assert_ne!(a.artifacts.digest(), b.artifacts.digest());
    }

    #[test]
    fn test_rejected_options_produce_no_artifacts() {
        let generator = ArtifactGenerator::new(&TemplateIntegrator, &NamesModel);
        let explicit = IntegratorOptions::new(0.02)
            .unwrap()
            .with_integrator_type(IntegratorType::ExplicitRk4);

        let result = generator.generate(&mut pendulum(), &explicit);
        assert!(matches!(
            result,
            Err(ExportError::CodeGeneration { status: 1 })
        ));
    }
}
