//! Pipeline orchestrator.
//!
//! Owns every run's state, drives the three generation stages, emits
//! progress events at stage boundaries, and settles each run on a terminal
//! outcome. The audio and portrait stages have no data dependency and run
//! concurrently; the animation stage starts only once both artifacts are
//! recorded.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{
    FaceAnimator, PortraitGenerator, SpeechSynthesizer, StageAdapters, StageRequest, StyleSpec,
};
use crate::domain::{
    GenerationError, ProgressEvent, Run, RunOutcome, RunOutput, RunRecord, Stage,
};

use super::journal::RunJournal;
use super::progress::{ProgressChannel, ProgressStream, DEFAULT_CAPACITY};
use super::store::ArtifactStore;

/// Maximum duration per stage invocation
#[derive(Debug, Clone)]
pub struct StageTimeouts {
    pub audio: Duration,
    pub image: Duration,
    pub animation: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            audio: Duration::from_secs(120),
            image: Duration::from_secs(600),
            animation: Duration::from_secs(1800),
        }
    }
}

impl StageTimeouts {
    fn for_stage(&self, stage: Stage) -> Duration {
        match stage {
            Stage::Audio => self.audio,
            Stage::Image => self.image,
            Stage::Animation => self.animation,
        }
    }
}

/// Tunables beyond the required collaborators
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub timeouts: StageTimeouts,
    pub style: StyleSpec,
    pub channel_capacity: usize,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            timeouts: StageTimeouts::default(),
            style: StyleSpec::default(),
            channel_capacity: DEFAULT_CAPACITY,
        }
    }
}

/// How a pipeline task ends early
enum PipelineEnd {
    Failed(GenerationError),
    Cancelled { stage: Stage },
}

/// Book-keeping for one live run
struct RunHandle {
    run: Run,
    outcome_tx: watch::Sender<Option<RunOutcome>>,
    cancelled: Arc<AtomicBool>,
}

/// Main pipeline orchestrator
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    adapters: StageAdapters,
    store: ArtifactStore,
    runs_root: PathBuf,
    timeouts: StageTimeouts,
    style: StyleSpec,
    progress: ProgressChannel,
    runs: Mutex<HashMap<Uuid, RunHandle>>,
}

impl Orchestrator {
    /// Create an orchestrator with default options
    pub fn new(adapters: StageAdapters, store: ArtifactStore, runs_root: impl Into<PathBuf>) -> Self {
        Self::with_options(adapters, store, runs_root, OrchestratorOptions::default())
    }

    pub fn with_options(
        adapters: StageAdapters,
        store: ArtifactStore,
        runs_root: impl Into<PathBuf>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                adapters,
                store,
                runs_root: runs_root.into(),
                timeouts: options.timeouts,
                style: options.style,
                progress: ProgressChannel::new(options.channel_capacity),
                runs: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Build the orchestrator from the resolved configuration
    pub fn from_config() -> Result<Self> {
        let cfg = crate::config::config()?;

        let speech: Arc<dyn crate::adapters::StageAdapter> = match &cfg.speech.endpoint {
            Some(endpoint) => Arc::new(SpeechSynthesizer::http(endpoint.clone())),
            None => Arc::new(SpeechSynthesizer::command(cfg.speech.command.clone())),
        };
        let portrait = Arc::new(PortraitGenerator::new(cfg.portrait.command.clone()));
        let animation = Arc::new(
            FaceAnimator::new(cfg.animation.command.clone())
                .with_enhancer(cfg.animation.enhancer.clone())
                .with_still(cfg.animation.still)
                .with_preprocess(cfg.animation.preprocess.clone()),
        );

        let options = OrchestratorOptions {
            timeouts: StageTimeouts {
                audio: cfg.speech.timeout,
                image: cfg.portrait.timeout,
                animation: cfg.animation.timeout,
            },
            style: StyleSpec {
                prompt: cfg.portrait.prompt.clone(),
                seed: cfg.portrait.seed,
                steps: cfg.portrait.steps,
                size: cfg.portrait.size,
            },
            channel_capacity: DEFAULT_CAPACITY,
        };

        Ok(Self::with_options(
            StageAdapters {
                speech,
                portrait,
                animation,
            },
            ArtifactStore::new(cfg.artifacts.clone()),
            cfg.home.join("runs"),
            options,
        ))
    }

    /// Accept a run. Validates only that the text is non-empty; the pipeline
    /// itself executes on a background task.
    #[instrument(skip(self, text))]
    pub fn start(&self, text: impl Into<String>) -> Result<Uuid, GenerationError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(GenerationError::invalid_input("text must be non-empty"));
        }

        let run_id = Uuid::new_v4();
        let cancelled = Arc::new(AtomicBool::new(false));
        let (outcome_tx, _) = watch::channel(None);

        {
            let mut runs = self.inner.runs.lock().unwrap();
            runs.insert(
                run_id,
                RunHandle {
                    run: Run::new(run_id, text.clone()),
                    outcome_tx,
                    cancelled: Arc::clone(&cancelled),
                },
            );
        }

        info!(%run_id, chars = text.len(), "run accepted");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.execute(run_id, text, cancelled).await;
        });

        Ok(run_id)
    }

    /// Suspend until the run reaches a terminal outcome
    pub async fn await_result(&self, run_id: Uuid) -> Result<RunOutcome> {
        let mut rx = {
            let runs = self.inner.runs.lock().unwrap();
            let handle = runs
                .get(&run_id)
                .with_context(|| format!("run {} not found", run_id))?;
            handle.outcome_tx.subscribe()
        };

        loop {
            if let Some(outcome) = rx.borrow().clone() {
                return Ok(outcome);
            }
            rx.changed()
                .await
                .context("run task ended without reporting an outcome")?;
        }
    }

    /// Live feed of one run's progress events (no replay)
    pub fn subscribe_progress(&self, run_id: Uuid) -> ProgressStream {
        self.inner.progress.subscribe(run_id)
    }

    /// Live feed of every run's progress events
    pub fn subscribe_all(&self) -> ProgressStream {
        self.inner.progress.subscribe_all()
    }

    /// Advisory cancellation. In-flight generator calls get a best-effort
    /// kill signal; one that cannot be interrupted finishes and its result
    /// is discarded. Returns false if the run is already terminal.
    pub fn cancel(&self, run_id: Uuid) -> Result<bool> {
        let runs = self.inner.runs.lock().unwrap();
        let handle = runs
            .get(&run_id)
            .with_context(|| format!("run {} not found", run_id))?;

        if handle.run.is_finished() {
            return Ok(false);
        }

        handle.cancelled.store(true, Ordering::Relaxed);
        info!(%run_id, "run marked cancelled");
        Ok(true)
    }

    /// Current state of a run: live snapshot if the run is still held in
    /// memory, otherwise reconstructed from its journal.
    pub async fn status(&self, run_id: Uuid) -> Result<Run> {
        if let Some(run) = {
            let runs = self.inner.runs.lock().unwrap();
            runs.get(&run_id).map(|handle| handle.run.clone())
        } {
            return Ok(run);
        }

        let journal = RunJournal::open(&self.inner.runs_root, run_id);
        let records = journal.replay().await?;
        Run::from_records(&records).with_context(|| format!("run {} not found", run_id))
    }

    /// Most recent runs, newest first, from the journals
    pub async fn list_runs(&self, limit: usize) -> Result<Vec<Run>> {
        let ids = RunJournal::list_runs(&self.inner.runs_root).await?;

        let mut runs = Vec::new();
        for run_id in ids {
            if let Ok(run) = self.status(run_id).await {
                runs.push(run);
            }
        }

        runs.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        runs.truncate(limit);

        Ok(runs)
    }

    /// Drop finished runs from memory, keeping the `keep` most recent.
    /// Their journals remain on disk. Returns the number evicted.
    pub fn evict_finished(&self, keep: usize) -> usize {
        let mut runs = self.inner.runs.lock().unwrap();

        let mut finished: Vec<(Uuid, chrono::DateTime<Utc>)> = runs
            .values()
            .filter(|handle| handle.run.is_finished())
            .map(|handle| {
                let at = handle.run.completed_at.unwrap_or(handle.run.submitted_at);
                (handle.run.id, at)
            })
            .collect();

        finished.sort_by(|a, b| b.1.cmp(&a.1));
        let evict: Vec<Uuid> = finished.into_iter().skip(keep).map(|(id, _)| id).collect();

        for run_id in &evict {
            runs.remove(run_id);
        }

        evict.len()
    }

    /// Probe every stage backend
    pub async fn health_check(&self) -> Result<()> {
        for stage in [Stage::Audio, Stage::Image, Stage::Animation] {
            self.inner
                .adapters
                .for_stage(stage)
                .health_check()
                .await
                .with_context(|| format!("{} backend failed its health check", stage))?;
        }
        Ok(())
    }

    /// The artifact store this orchestrator writes to
    pub fn store(&self) -> &ArtifactStore {
        &self.inner.store
    }
}

impl Inner {
    /// Drive one run from submission to a terminal outcome
    #[instrument(skip(self, text, cancelled))]
    async fn execute(self: Arc<Self>, run_id: Uuid, text: String, cancelled: Arc<AtomicBool>) {
        let journal = match RunJournal::create(&self.runs_root, run_id).await {
            Ok(journal) => journal,
            Err(err) => {
                warn!(error = %err, "failed to create run journal");
                RunJournal::open(&self.runs_root, run_id)
            }
        };
        self.append_record(
            &journal,
            RunRecord::Submitted {
                run_id,
                text: text.clone(),
                timestamp: Utc::now(),
            },
        )
        .await;

        if let Err(err) = self.store.prepare().await {
            let error = GenerationError::model_failure(format!("artifact store unavailable: {:#}", err));
            self.emit(&journal, ProgressEvent::failed(run_id, Stage::Audio, error.clone()))
                .await;
            self.settle(&journal, run_id, RunOutcome::Failed(error)).await;
            return;
        }

        // Audio and portrait are independent; run them concurrently. The
        // first failure drops the sibling future, which kills its backend
        // process best-effort.
        let audio_fut = self.run_stage(
            &journal,
            run_id,
            StageRequest::Speech { text },
            &cancelled,
        );
        let image_fut = self.run_stage(
            &journal,
            run_id,
            StageRequest::Portrait {
                style: self.style.clone(),
            },
            &cancelled,
        );

        let (audio, image) = match tokio::try_join!(audio_fut, image_fut) {
            Ok(artifacts) => artifacts,
            Err(end) => return self.end(&journal, run_id, end).await,
        };

        // Animation never starts without both upstream artifacts usable.
        if !audio.is_usable() || !image.is_usable() {
            let error = GenerationError::model_failure("upstream artifact missing or empty");
            self.emit(&journal, ProgressEvent::failed(run_id, Stage::Animation, error.clone()))
                .await;
            self.settle(&journal, run_id, RunOutcome::Failed(error)).await;
            return;
        }

        let video = match self
            .run_stage(
                &journal,
                run_id,
                StageRequest::Animation {
                    audio: audio.clone(),
                    image,
                },
                &cancelled,
            )
            .await
        {
            Ok(video) => video,
            Err(end) => return self.end(&journal, run_id, end).await,
        };

        let output = RunOutput {
            audio_path: audio.path,
            video_path: video.path,
        };
        self.settle(&journal, run_id, RunOutcome::Completed(output)).await;
    }

    /// Execute one stage: started event, adapter call, succeeded/failed event
    async fn run_stage(
        &self,
        journal: &RunJournal,
        run_id: Uuid,
        request: StageRequest,
        cancelled: &AtomicBool,
    ) -> Result<crate::domain::ArtifactRef, PipelineEnd> {
        let stage = request.stage();

        if cancelled.load(Ordering::Relaxed) {
            return Err(PipelineEnd::Cancelled { stage });
        }

        let adapter = Arc::clone(self.adapters.for_stage(stage));
        let timeout = self.timeouts.for_stage(stage);
        let output = self.store.artifact_path(run_id, stage);

        self.emit(journal, ProgressEvent::started(run_id, stage)).await;
        info!(%run_id, %stage, "stage started");
        let started = Instant::now();

        match adapter.generate(&request, &output, timeout).await {
            Ok(artifact) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                if cancelled.load(Ordering::Relaxed) {
                    // Result discarded; the file stays on disk for the
                    // retention sweep.
                    return Err(PipelineEnd::Cancelled { stage });
                }
                info!(%run_id, %stage, duration_ms, "stage succeeded");
                self.emit(
                    journal,
                    ProgressEvent::succeeded(run_id, stage, artifact.clone())
                        .with_duration(duration_ms),
                )
                .await;
                Ok(artifact)
            }
            Err(err) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                error!(%run_id, %stage, error = %err, "stage failed");
                self.emit(
                    journal,
                    ProgressEvent::failed(run_id, stage, err.clone()).with_duration(duration_ms),
                )
                .await;
                Err(PipelineEnd::Failed(err))
            }
        }
    }

    /// Settle an early pipeline end
    async fn end(&self, journal: &RunJournal, run_id: Uuid, end: PipelineEnd) {
        match end {
            PipelineEnd::Failed(error) => {
                self.settle(journal, run_id, RunOutcome::Failed(error)).await;
            }
            PipelineEnd::Cancelled { stage } => {
                self.emit(journal, ProgressEvent::cancelled(run_id, stage)).await;
                self.settle(journal, run_id, RunOutcome::Cancelled).await;
            }
        }
    }

    /// Apply an event to the run, broadcast it, and journal it.
    ///
    /// State update and broadcast happen under the registry lock, so
    /// subscribers observe events in state order and nothing is published
    /// after a run's terminal event.
    async fn emit(&self, journal: &RunJournal, event: ProgressEvent) {
        let published = {
            let mut runs = self.runs.lock().unwrap();
            match runs.get_mut(&event.run_id) {
                Some(handle) if !handle.run.is_finished() => {
                    handle.run.apply_event(&event);
                    self.progress.publish(event.clone());
                    true
                }
                _ => false,
            }
        };

        if published {
            self.append_record(journal, RunRecord::Progress(event)).await;
        }
    }

    /// Record the terminal outcome and wake result waiters
    async fn settle(&self, journal: &RunJournal, run_id: Uuid, outcome: RunOutcome) {
        let outcome = {
            let mut runs = self.runs.lock().unwrap();
            match runs.get_mut(&run_id) {
                Some(handle) => {
                    // If a stage event already put an error on the run, that
                    // is the one subscribers saw; keep the two in agreement.
                    let outcome = match outcome {
                        RunOutcome::Failed(error) => {
                            RunOutcome::Failed(handle.run.error.clone().unwrap_or(error))
                        }
                        other => other,
                    };
                    handle.run.finish(&outcome);
                    let _ = handle.outcome_tx.send_replace(Some(outcome.clone()));
                    outcome
                }
                None => outcome,
            }
        };

        match &outcome {
            RunOutcome::Completed(output) => {
                info!(%run_id, video = %output.video_path.display(), "run completed")
            }
            RunOutcome::Failed(error) => error!(%run_id, %error, "run failed"),
            RunOutcome::Cancelled => info!(%run_id, "run cancelled"),
        }

        self.append_record(
            journal,
            RunRecord::Finished {
                run_id,
                outcome,
                timestamp: Utc::now(),
            },
        )
        .await;
    }

    async fn append_record(&self, journal: &RunJournal, record: RunRecord) {
        if let Err(error) = journal.append(&record).await {
            warn!(%error, "failed to journal run record");
        }
    }
}
