//! Integration tests for the generation pipeline.
//!
//! Process-level tests drive small shell scripts standing in for the mesh
//! builder and renderer; concurrency tests use `ScriptedExecutor`.

use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use treegen_core::{report, ArtifactRef, FailureKind, PipelineConfig};
use treegen_pipeline::fakes::{Behavior, ScriptedExecutor};
use treegen_pipeline::{DisplayProbe, GenerationPipeline, ProcessRunner};

const GRAMMAR: &str = "#a nice decent tree!\n6\n25\n15\nfA\nA=^f >(30) B\\B\\\\\\B\nB=[^^fL \\\\\\A L  ]\nL=[^(60)*(.3)]\n@";

/// Builder that writes a small OFF mesh to its last argument.
const BUILD_OK: &str = "#!/bin/sh\nfor last; do :; done\nprintf 'OFF\\n3 1 0\\n' > \"$last\"\n";

/// Builder that rejects every grammar.
const BUILD_REJECT: &str = "#!/bin/sh\necho 'parse error at line 1' >&2\nexit 1\n";

/// Builder that spins until the CPU ceiling kills it.
const BUILD_SPIN: &str = "#!/bin/sh\nwhile :; do :; done\n";

/// Renderer: $1 mesh, $2 -exit_immediately, $3 -output_image, $4 image.
const RENDER_OK: &str =
    "#!/bin/sh\n: > \"$(dirname \"$0\")/render.invoked\"\nprintf 'JPEG' > \"$4\"\n";

/// Renderer that records its invocation but never writes an image.
const RENDER_NOTHING: &str = "#!/bin/sh\n: > \"$(dirname \"$0\")/render.invoked\"\n";

fn write_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

struct Harness {
    dir: tempfile::TempDir,
    pipeline: GenerationPipeline,
}

impl Harness {
    fn new(build: &str, render: &str, cpu_limit_secs: u64) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let tools = dir.path().join("tools");
        fs::create_dir_all(&tools).unwrap();

        let config = PipelineConfig {
            cpu_limit_secs,
            wall_factor: 4,
            artifact_dir: dir.path().join("artifacts"),
            build_command: write_tool(&tools, "meshpro", build),
            render_command: write_tool(&tools, "meshview", render),
            ..PipelineConfig::default()
        };
        let runner = ProcessRunner::with_display_probe(DisplayProbe::Skip);
        let pipeline = GenerationPipeline::new(&config, Arc::new(runner)).unwrap();
        Self { dir, pipeline }
    }

    fn render_invoked(&self) -> bool {
        self.dir.path().join("tools").join("render.invoked").exists()
    }
}

/// Test: both mock stages succeed and the references resolve to their files
#[tokio::test]
async fn test_successful_generation_resolves_refs() {
    let h = Harness::new(BUILD_OK, RENDER_OK, 5);

    let outcome = h.pipeline.run(GRAMMAR).await;
    assert!(outcome.success, "pipeline should succeed: {outcome:?}");

    let r = report(&outcome);
    assert!(r.success);
    let mesh_ref = r.mesh_ref.clone().expect("mesh ref");
    let image_ref = r.image_ref.clone().expect("image ref");

    let mesh = h.pipeline.store().resolve(&mesh_ref).unwrap();
    let image = h.pipeline.store().resolve(&image_ref).unwrap();
    assert!(fs::read_to_string(mesh).unwrap().starts_with("OFF"));
    assert_eq!(fs::read(image).unwrap(), b"JPEG");

    // refs survive a round trip through their string form
    let reparsed: ArtifactRef = image_ref.to_string().parse().unwrap();
    assert_eq!(reparsed, image_ref);
}

/// Test: a rejected grammar never reaches the renderer
#[tokio::test]
async fn test_rejected_grammar_skips_render() {
    let h = Harness::new(BUILD_REJECT, RENDER_OK, 5);

    let outcome = h.pipeline.run("this is not an L-system").await;

    assert!(!outcome.success);
    assert_eq!(outcome.failure, Some(FailureKind::MissingArtifact));
    assert_eq!(outcome.failed_stage.as_deref(), Some("build"));
    assert!(!h.render_invoked(), "render must not be launched");
}

/// Test: a build killed at the CPU ceiling fails within ceiling + overhead
#[tokio::test]
async fn test_build_cpu_ceiling() {
    let h = Harness::new(BUILD_SPIN, RENDER_OK, 1);

    let outcome = h.pipeline.run(GRAMMAR).await;

    assert!(!outcome.success);
    assert_eq!(outcome.failure, Some(FailureKind::TimeoutKilled));
    assert!(
        outcome.elapsed < Duration::from_secs(1) + Duration::from_secs(8),
        "elapsed {:?}",
        outcome.elapsed
    );
    assert!(!h.render_invoked());

    let r = report(&outcome);
    assert!(!r.success);
    assert_eq!(r.message, "generation failed");
}

/// Test: render produces nothing, so nothing is exposed but the mesh stays on disk
#[tokio::test]
async fn test_render_failure_hides_existing_mesh() {
    let h = Harness::new(BUILD_OK, RENDER_NOTHING, 5);

    let outcome = h.pipeline.run(GRAMMAR).await;

    assert!(!outcome.success);
    assert_eq!(outcome.failure, Some(FailureKind::MissingArtifact));
    assert_eq!(outcome.failed_stage.as_deref(), Some("render"));
    assert!(h.render_invoked());

    let r = report(&outcome);
    assert!(r.image_ref.is_none());
    assert!(r.mesh_ref.is_none());

    let base_id = outcome.base_id.expect("base id allocated");
    let mesh = h.pipeline.store().resolve(&ArtifactRef::mesh(&base_id));
    assert!(mesh.is_ok(), "mesh should still exist on disk");
}

/// Test: missing build tool is a launch failure
#[tokio::test]
async fn test_missing_build_tool() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig {
        artifact_dir: dir.path().join("artifacts"),
        build_command: dir.path().join("no-such-meshpro"),
        ..PipelineConfig::default()
    };
    let runner = ProcessRunner::with_display_probe(DisplayProbe::Skip);
    let pipeline = GenerationPipeline::new(&config, Arc::new(runner)).unwrap();

    let outcome = pipeline.run(GRAMMAR).await;
    assert_eq!(outcome.failure, Some(FailureKind::Launch));
}

/// Test: identical submissions produce independent artifact sets
#[tokio::test]
async fn test_identical_submissions_not_deduplicated() {
    let h = Harness::new(BUILD_OK, RENDER_OK, 5);

    let first = h.pipeline.run(GRAMMAR).await;
    let second = h.pipeline.run(GRAMMAR).await;

    assert!(first.success && second.success);
    assert_ne!(first.base_id, second.base_id);
    assert_ne!(first.image, second.image);
    assert_ne!(first.mesh, second.mesh);
}

/// Test: concurrent submissions never share a base identifier
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_unique() {
    const N: usize = 64;

    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig {
        artifact_dir: dir.path().join("artifacts"),
        ..PipelineConfig::default()
    };
    let executor = Arc::new(ScriptedExecutor::new().with("render", Behavior::Produce));
    let pipeline = Arc::new(GenerationPipeline::new(&config, executor.clone()).unwrap());

    let handles: Vec<_> = (0..N)
        .map(|i| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.run(&format!("F\nF=F[+F]{i}\n@")).await })
        })
        .collect();
    let outcomes: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert!(outcomes.iter().all(|o| o.success));
    let ids: HashSet<_> = outcomes.iter().filter_map(|o| o.base_id.clone()).collect();
    assert_eq!(ids.len(), N);
    let images: HashSet<_> = outcomes.iter().filter_map(|o| o.image.clone()).collect();
    assert_eq!(images.len(), N);
    assert_eq!(executor.invocations().len(), 2 * N);
}
