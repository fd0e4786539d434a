//! Orchestrator Integration Tests
//!
//! Drives full pipelines with scripted in-process stage adapters standing in
//! for the external generators: event ordering, failure propagation,
//! concurrent runs, cancellation, and subscriber isolation.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use uuid::Uuid;

use talkinghead::core::{Orchestrator, OrchestratorOptions, ProgressStream};
use talkinghead::{
    ArtifactKind, ArtifactRef, ErrorKind, GenerationError, ProgressEvent, RunOutcome, RunStage,
    Stage, StageAdapter, StageAdapters, StageRequest, StageStatus,
};

/// What a scripted stage does when invoked
#[derive(Clone)]
enum Script {
    /// Sleep, then write `content` to the output path and succeed
    Succeed { delay: Duration, content: Vec<u8> },

    /// Sleep, then fail with the given error
    Fail {
        delay: Duration,
        error: GenerationError,
    },
}

/// In-process stand-in for an external generator
struct ScriptedAdapter {
    stage: Stage,
    script: Script,
    invoked: Arc<AtomicBool>,
}

impl ScriptedAdapter {
    fn succeed(stage: Stage) -> Self {
        Self::succeed_after(stage, Duration::from_millis(10))
    }

    fn succeed_after(stage: Stage, delay: Duration) -> Self {
        Self {
            stage,
            script: Script::Succeed {
                delay,
                content: b"generated".to_vec(),
            },
            invoked: Arc::new(AtomicBool::new(false)),
        }
    }

    fn succeed_empty(stage: Stage) -> Self {
        Self {
            stage,
            script: Script::Succeed {
                delay: Duration::from_millis(10),
                content: Vec::new(),
            },
            invoked: Arc::new(AtomicBool::new(false)),
        }
    }

    fn fail_after(stage: Stage, delay: Duration, error: GenerationError) -> Self {
        Self {
            stage,
            script: Script::Fail { delay, error },
            invoked: Arc::new(AtomicBool::new(false)),
        }
    }

    fn invoked_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.invoked)
    }
}

#[async_trait]
impl StageAdapter for ScriptedAdapter {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn generate(
        &self,
        _request: &StageRequest,
        output: &Path,
        _timeout: Duration,
    ) -> Result<ArtifactRef, GenerationError> {
        self.invoked.store(true, Ordering::Relaxed);

        match &self.script {
            Script::Succeed { delay, content } => {
                tokio::time::sleep(*delay).await;
                tokio::fs::write(output, content)
                    .await
                    .map_err(|e| GenerationError::model_failure(e.to_string()))?;
                Ok(ArtifactRef::new(
                    ArtifactKind::for_stage(self.stage),
                    output.to_path_buf(),
                    content.len() as u64,
                ))
            }
            Script::Fail { delay, error } => {
                tokio::time::sleep(*delay).await;
                Err(error.clone())
            }
        }
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

fn orchestrator(
    temp: &TempDir,
    speech: ScriptedAdapter,
    portrait: ScriptedAdapter,
    animation: ScriptedAdapter,
) -> Orchestrator {
    Orchestrator::new(
        StageAdapters {
            speech: Arc::new(speech),
            portrait: Arc::new(portrait),
            animation: Arc::new(animation),
        },
        talkinghead::ArtifactStore::new(temp.path().join("artifacts")),
        temp.path().join("runs"),
    )
}

/// Collect one run's events until its terminal event (or a deadline)
async fn drain_run(stream: &mut ProgressStream, run_id: Uuid) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(5), stream.next()).await {
            Ok(Some(event)) => {
                if event.run_id != run_id {
                    continue;
                }
                let terminal = event.is_terminal();
                events.push(event);
                if terminal {
                    break;
                }
            }
            Ok(None) => break,
            Err(_) => break,
        }
    }
    events
}

fn statuses(events: &[ProgressEvent]) -> Vec<(Stage, StageStatus)> {
    events.iter().map(|e| (e.stage, e.status)).collect()
}

fn position(events: &[ProgressEvent], stage: Stage, status: StageStatus) -> Option<usize> {
    events
        .iter()
        .position(|e| e.stage == stage && e.status == status)
}

#[tokio::test]
async fn test_successful_run_produces_all_three_artifacts() {
    let temp = TempDir::new().unwrap();
    let orchestrator = orchestrator(
        &temp,
        ScriptedAdapter::succeed(Stage::Audio),
        ScriptedAdapter::succeed(Stage::Image),
        ScriptedAdapter::succeed(Stage::Animation),
    );

    let mut stream = orchestrator.subscribe_all();
    let run_id = orchestrator.start("Hello world").unwrap();

    let events = drain_run(&mut stream, run_id).await;
    let seen = statuses(&events);

    // Exactly the six stage-boundary events, every one for this run.
    assert_eq!(events.len(), 6);
    for expected in [
        (Stage::Audio, StageStatus::Started),
        (Stage::Audio, StageStatus::Succeeded),
        (Stage::Image, StageStatus::Started),
        (Stage::Image, StageStatus::Succeeded),
        (Stage::Animation, StageStatus::Started),
        (Stage::Animation, StageStatus::Succeeded),
    ] {
        assert!(seen.contains(&expected), "missing event {:?}", expected);
    }

    // Audio and image both finish before animation starts; each stage
    // starts before it succeeds.
    let animation_started = position(&events, Stage::Animation, StageStatus::Started).unwrap();
    for stage in [Stage::Audio, Stage::Image] {
        let started = position(&events, stage, StageStatus::Started).unwrap();
        let succeeded = position(&events, stage, StageStatus::Succeeded).unwrap();
        assert!(started < succeeded);
        assert!(succeeded < animation_started);
    }
    assert!(events.last().unwrap().is_terminal());

    // The result carries the audio and video paths, partitioned by run id.
    let outcome = orchestrator.await_result(run_id).await.unwrap();
    let output = match outcome {
        RunOutcome::Completed(output) => output,
        other => panic!("expected completion, got {:?}", other),
    };

    let audio = output.audio_path.to_string_lossy().into_owned();
    let video = output.video_path.to_string_lossy().into_owned();
    assert!(audio.contains("/audio/"), "unexpected path {}", audio);
    assert!(video.contains("/video/"), "unexpected path {}", video);
    assert!(audio.contains(&run_id.to_string()));
    assert!(video.contains(&run_id.to_string()));
    assert!(output.audio_path.exists());
    assert!(output.video_path.exists());

    // The portrait artifact exists too, recorded on the run.
    let run = orchestrator.status(run_id).await.unwrap();
    assert_eq!(run.stage, RunStage::Completed);
    let image = run.artifacts.get(&Stage::Image).unwrap();
    assert!(image.path.exists());
    assert!(image.path.to_string_lossy().contains("/image/"));
}

#[tokio::test]
async fn test_audio_failure_fails_the_run_without_starting_animation() {
    let temp = TempDir::new().unwrap();
    let speech = ScriptedAdapter::fail_after(
        Stage::Audio,
        Duration::from_millis(10),
        GenerationError::model_failure("synthesizer crashed"),
    );
    // Portrait is still in flight when audio fails; it gets abandoned.
    let portrait = ScriptedAdapter::succeed_after(Stage::Image, Duration::from_millis(500));
    let animation = ScriptedAdapter::succeed(Stage::Animation);
    let animation_invoked = animation.invoked_flag();

    let orchestrator = orchestrator(&temp, speech, portrait, animation);

    let mut stream = orchestrator.subscribe_all();
    let run_id = orchestrator.start("Hello world").unwrap();

    let events = drain_run(&mut stream, run_id).await;

    // Exactly one terminal event, and it is the audio failure.
    let failed: Vec<_> = events
        .iter()
        .filter(|e| e.status == StageStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].stage, Stage::Audio);

    // The abandoned portrait never records a success, and animation never runs.
    assert!(position(&events, Stage::Image, StageStatus::Succeeded).is_none());
    assert!(position(&events, Stage::Animation, StageStatus::Started).is_none());
    assert!(!animation_invoked.load(Ordering::Relaxed));

    match orchestrator.await_result(run_id).await.unwrap() {
        RunOutcome::Failed(error) => {
            assert_eq!(error.kind, ErrorKind::ModelFailure);
            assert_eq!(error.message, "synthesizer crashed");
        }
        other => panic!("expected failure, got {:?}", other),
    }

    let run = orchestrator.status(run_id).await.unwrap();
    assert_eq!(run.stage, RunStage::Failed);
}

#[tokio::test]
async fn test_animation_timeout_reaches_failed_not_completed() {
    let temp = TempDir::new().unwrap();
    let orchestrator = orchestrator(
        &temp,
        ScriptedAdapter::succeed(Stage::Audio),
        ScriptedAdapter::succeed(Stage::Image),
        ScriptedAdapter::fail_after(
            Stage::Animation,
            Duration::from_millis(20),
            GenerationError::timeout("animation stage exceeded 1800s"),
        ),
    );

    let mut stream = orchestrator.subscribe_all();
    let run_id = orchestrator.start("Hello world").unwrap();
    let events = drain_run(&mut stream, run_id).await;

    assert!(position(&events, Stage::Animation, StageStatus::Succeeded).is_none());
    let terminal = events.last().unwrap();
    assert_eq!(terminal.stage, Stage::Animation);
    assert_eq!(terminal.status, StageStatus::Failed);

    match orchestrator.await_result(run_id).await.unwrap() {
        RunOutcome::Failed(error) => assert_eq!(error.kind, ErrorKind::Timeout),
        other => panic!("expected timeout failure, got {:?}", other),
    }

    let run = orchestrator.status(run_id).await.unwrap();
    assert_eq!(run.stage, RunStage::Failed);
}

#[tokio::test]
async fn test_concurrent_runs_do_not_cross_event_streams() {
    let temp = TempDir::new().unwrap();
    let orchestrator = orchestrator(
        &temp,
        ScriptedAdapter::succeed_after(Stage::Audio, Duration::from_millis(5)),
        ScriptedAdapter::succeed_after(Stage::Image, Duration::from_millis(25)),
        ScriptedAdapter::succeed(Stage::Animation),
    );

    let mut stream_a = orchestrator.subscribe_all();
    let mut stream_b = orchestrator.subscribe_all();

    let run_a = orchestrator.start("first speaker").unwrap();
    let run_b = orchestrator.start("second speaker").unwrap();
    assert_ne!(run_a, run_b);

    let events_a = drain_run(&mut stream_a, run_a).await;
    let events_b = drain_run(&mut stream_b, run_b).await;

    assert_eq!(events_a.len(), 6);
    assert_eq!(events_b.len(), 6);
    assert!(events_a.iter().all(|e| e.run_id == run_a));
    assert!(events_b.iter().all(|e| e.run_id == run_b));

    // Both runs complete independently, with distinct artifact paths.
    let out_a = match orchestrator.await_result(run_a).await.unwrap() {
        RunOutcome::Completed(output) => output,
        other => panic!("run a: {:?}", other),
    };
    let out_b = match orchestrator.await_result(run_b).await.unwrap() {
        RunOutcome::Completed(output) => output,
        other => panic!("run b: {:?}", other),
    };
    assert_ne!(out_a.audio_path, out_b.audio_path);
    assert_ne!(out_a.video_path, out_b.video_path);
}

#[tokio::test]
async fn test_subscribe_progress_yields_only_that_runs_events() {
    let temp = TempDir::new().unwrap();
    let orchestrator = orchestrator(
        &temp,
        ScriptedAdapter::succeed_after(Stage::Audio, Duration::from_millis(20)),
        ScriptedAdapter::succeed_after(Stage::Image, Duration::from_millis(20)),
        ScriptedAdapter::succeed(Stage::Animation),
    );

    let run_a = orchestrator.start("first speaker").unwrap();
    let run_b = orchestrator.start("second speaker").unwrap();

    // A live feed: events published before this point are not replayed.
    let mut stream = orchestrator.subscribe_progress(run_a);
    let events = drain_run(&mut stream, run_a).await;

    assert!(!events.is_empty());
    assert!(events.iter().all(|e| e.run_id == run_a));
    assert!(events.last().unwrap().is_terminal());

    // The other run still completes untouched.
    let outcome = orchestrator.await_result(run_b).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(_)));
}

#[tokio::test]
async fn test_resubmitting_identical_text_is_a_fresh_run() {
    let temp = TempDir::new().unwrap();
    let orchestrator = orchestrator(
        &temp,
        ScriptedAdapter::succeed(Stage::Audio),
        ScriptedAdapter::succeed(Stage::Image),
        ScriptedAdapter::succeed(Stage::Animation),
    );

    let first = orchestrator.start("Hello world").unwrap();
    let second = orchestrator.start("Hello world").unwrap();
    assert_ne!(first, second);

    for run_id in [first, second] {
        match orchestrator.await_result(run_id).await.unwrap() {
            RunOutcome::Completed(_) => {}
            other => panic!("expected completion, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_slow_subscriber_never_stalls_the_pipeline() {
    let temp = TempDir::new().unwrap();
    let orchestrator = Orchestrator::with_options(
        StageAdapters {
            speech: Arc::new(ScriptedAdapter::succeed(Stage::Audio)),
            portrait: Arc::new(ScriptedAdapter::succeed(Stage::Image)),
            animation: Arc::new(ScriptedAdapter::succeed(Stage::Animation)),
        },
        talkinghead::ArtifactStore::new(temp.path().join("artifacts")),
        temp.path().join("runs"),
        OrchestratorOptions {
            // Tiny buffer so an unpolled subscriber lags immediately.
            channel_capacity: 2,
            ..OrchestratorOptions::default()
        },
    );

    // Never polled.
    let _stuck = orchestrator.subscribe_all();

    let run_id = orchestrator.start("Hello world").unwrap();
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.await_result(run_id),
    )
    .await
    .expect("pipeline stalled behind a slow subscriber")
    .unwrap();

    assert!(matches!(outcome, RunOutcome::Completed(_)));
}

#[tokio::test]
async fn test_cancelled_run_discards_results_and_skips_later_stages() {
    let temp = TempDir::new().unwrap();
    let speech = ScriptedAdapter::succeed_after(Stage::Audio, Duration::from_millis(150));
    let portrait = ScriptedAdapter::succeed_after(Stage::Image, Duration::from_millis(150));
    let animation = ScriptedAdapter::succeed(Stage::Animation);
    let animation_invoked = animation.invoked_flag();

    let orchestrator = orchestrator(&temp, speech, portrait, animation);

    let mut stream = orchestrator.subscribe_all();
    let run_id = orchestrator.start("Hello world").unwrap();

    // Cancel while audio and image are still in flight.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(orchestrator.cancel(run_id).unwrap());

    let outcome = orchestrator.await_result(run_id).await.unwrap();
    assert_eq!(outcome, RunOutcome::Cancelled);
    assert!(!animation_invoked.load(Ordering::Relaxed));

    let events = drain_run(&mut stream, run_id).await;
    let terminal = events.last().unwrap();
    assert_eq!(terminal.status, StageStatus::Failed);
    assert_eq!(terminal.detail.as_deref(), Some("run cancelled by owner"));

    let run = orchestrator.status(run_id).await.unwrap();
    assert_eq!(run.stage, RunStage::Cancelled);

    // Cancelling a terminal run is a no-op.
    assert!(!orchestrator.cancel(run_id).unwrap());
}

#[tokio::test]
async fn test_animation_is_gated_on_usable_upstream_artifacts() {
    let temp = TempDir::new().unwrap();
    // Audio "succeeds" but writes an empty file.
    let speech = ScriptedAdapter::succeed_empty(Stage::Audio);
    let portrait = ScriptedAdapter::succeed(Stage::Image);
    let animation = ScriptedAdapter::succeed(Stage::Animation);
    let animation_invoked = animation.invoked_flag();

    let orchestrator = orchestrator(&temp, speech, portrait, animation);
    let run_id = orchestrator.start("Hello world").unwrap();

    match orchestrator.await_result(run_id).await.unwrap() {
        RunOutcome::Failed(error) => assert_eq!(error.kind, ErrorKind::ModelFailure),
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(!animation_invoked.load(Ordering::Relaxed));
}

#[tokio::test]
async fn test_evicted_run_remains_inspectable_through_its_journal() {
    let temp = TempDir::new().unwrap();
    let orchestrator = orchestrator(
        &temp,
        ScriptedAdapter::succeed(Stage::Audio),
        ScriptedAdapter::succeed(Stage::Image),
        ScriptedAdapter::succeed(Stage::Animation),
    );

    let run_id = orchestrator.start("Hello world").unwrap();
    let outcome = orchestrator.await_result(run_id).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(_)));

    assert_eq!(orchestrator.evict_finished(0), 1);

    // Result delivery channels are gone with the handle...
    assert!(orchestrator.await_result(run_id).await.is_err());

    // ...but the journal still reconstructs the finished run.
    let run = orchestrator.status(run_id).await.unwrap();
    assert_eq!(run.stage, RunStage::Completed);
    assert_eq!(run.text, "Hello world");
    assert!(run.output().is_some());

    let listed = orchestrator.list_runs(10).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, run_id);
}
