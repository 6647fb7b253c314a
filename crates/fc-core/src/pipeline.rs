mod state;

use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info, warn};

use crate::error::{PipelineError, Result};
use crate::progress::{Cancellation, ProgressEvent, ProgressSink, Stage};
use crate::request::GenerationRequest;
use crate::run::{OutputLayout, RunPaths};
use crate::stages::StageRunner;

pub use state::{PipelineRun, PipelineState};

/// How a run ended, for the caller's logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(PathBuf),
    Failed(String),
    Cancelled,
}

/// Drives the four stages in order and reports progress on a `ProgressSink`.
///
/// Stages are blocking and run on tokio's blocking pool; the pipeline only
/// wakes up between them to report progress.
#[derive(Clone)]
pub struct Pipeline {
    stages: Arc<dyn StageRunner>,
    layout: OutputLayout,
}

impl Pipeline {
    pub fn new(stages: Arc<dyn StageRunner>, layout: OutputLayout) -> Self {
        Self { stages, layout }
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Run the whole pipeline for one request.
    ///
    /// Exactly one terminal event is emitted: the 100% success event or a
    /// single error event. Nothing runs after a failure.
    pub async fn run(&self, request: GenerationRequest, events: ProgressSink) -> RunOutcome {
        let paths = match self.layout.prepare_run() {
            Ok(paths) => paths,
            Err(e) => {
                error!("Failed to prepare run directories: {}", e);
                let _ = events.emit(ProgressEvent::failed(&e));
                return RunOutcome::Failed(e.to_string());
            }
        };

        let mut run = PipelineRun::new(paths);
        info!("Starting run {} at {}", run.paths.id, run.started_at.to_rfc3339());

        let outcome = match self.drive(&mut run, &request, &events).await {
            Ok(video) => {
                let elapsed = run.elapsed();
                let done = ProgressEvent::done(run.paths.video_url(), elapsed);
                if events.emit(done).is_err() {
                    warn!("Run {} finished after the client disconnected", run.paths.id);
                }
                info!(
                    "Run {} finished in {:.2}s: {}",
                    run.paths.id,
                    elapsed.as_secs_f64(),
                    video.display()
                );
                RunOutcome::Completed(video)
            }
            Err(PipelineError::Cancelled) => {
                warn!("Run {} cancelled: client disconnected", run.paths.id);
                RunOutcome::Cancelled
            }
            Err(e) => {
                error!("Run {} failed in {:?}: {}", run.paths.id, run.state(), e);
                let _ = run.transition(PipelineState::Error);
                let _ = events.emit(ProgressEvent::failed(&e));
                RunOutcome::Failed(e.to_string())
            }
        };

        run.paths.cleanup();
        outcome
    }

    async fn drive(
        &self,
        run: &mut PipelineRun,
        request: &GenerationRequest,
        events: &ProgressSink,
    ) -> Result<PathBuf> {
        let description = request.character_description.clone();
        let prompt = self
            .stage(run, events, Stage::Prompt, move |s, _, _| s.expand_prompt(&description))
            .await?;
        run.image_prompt = Some(prompt.clone());

        let image = self
            .stage(run, events, Stage::Image, move |s, paths, _| s.generate_image(&prompt, paths))
            .await?;
        run.avatar_image = Some(image.clone());

        let script = request.script.clone();
        let audio = self
            .stage(run, events, Stage::Audio, move |s, paths, _| s.synthesize_audio(&script, paths))
            .await?;
        run.audio = Some(audio.clone());

        let video = self
            .stage(run, events, Stage::Video, move |s, paths, cancel| {
                s.animate(&image, &audio, paths, cancel)
            })
            .await?;
        run.video = Some(video.clone());

        run.transition(PipelineState::Done)?;
        Ok(video)
    }

    /// Enter `stage`, run `work` on the blocking pool and report completion.
    /// The video stage's completion is the terminal event, sent by `run`.
    async fn stage<T, F>(
        &self,
        run: &mut PipelineRun,
        events: &ProgressSink,
        stage: Stage,
        work: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn StageRunner, &RunPaths, &Cancellation) -> Result<T> + Send + 'static,
    {
        run.transition(stage.into())?;
        events.emit(ProgressEvent::started(stage))?;
        info!("Run {}: {:?} stage started", run.paths.id, stage);

        let stages = Arc::clone(&self.stages);
        let paths = run.paths.clone();
        let cancel = events.cancellation();
        let output = tokio::task::spawn_blocking(move || work(&*stages, &paths, &cancel))
            .await
            .map_err(|e| PipelineError::Worker(format!("{stage:?} stage: {e}")))??;

        if stage != Stage::Video {
            events.emit(ProgressEvent::finished(stage))?;
        }
        info!("Run {}: {:?} stage complete", run.paths.id, stage);

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::Status;
    use crate::stages::audio::tests::write_tone;
    use crate::stages::{
        AudioSpec, AudioTranscoder, ComputeDevice, ImageModel, LanguageModel, LipSyncProcess,
        SpeechSynth, Stages,
    };
    use image::{DynamicImage, Rgb, RgbImage};
    use std::path::Path;
    use std::process::Command;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct FakeStages {
        fail_at: Option<Stage>,
        panic_at: Option<Stage>,
        calls: Mutex<Vec<Stage>>,
    }

    impl FakeStages {
        fn enter(&self, stage: Stage) -> Result<()> {
            self.calls.lock().unwrap().push(stage);
            if self.panic_at == Some(stage) {
                panic!("stage blew up");
            }
            if self.fail_at == Some(stage) {
                return Err(PipelineError::Collaborator(format!("{stage:?} collaborator down")));
            }
            Ok(())
        }

        fn calls(&self) -> Vec<Stage> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl StageRunner for FakeStages {
        fn expand_prompt(&self, character_description: &str) -> Result<String> {
            self.enter(Stage::Prompt)?;
            Ok(format!("portrait of {character_description}"))
        }

        fn generate_image(&self, _prompt: &str, run: &RunPaths) -> Result<PathBuf> {
            self.enter(Stage::Image)?;
            Ok(run.image.clone())
        }

        fn synthesize_audio(&self, _script: &str, run: &RunPaths) -> Result<PathBuf> {
            self.enter(Stage::Audio)?;
            Ok(run.audio.clone())
        }

        fn animate(
            &self,
            _image: &Path,
            _audio: &Path,
            run: &RunPaths,
            _cancel: &Cancellation,
        ) -> Result<PathBuf> {
            self.enter(Stage::Video)?;
            std::fs::write(&run.video, b"mp4")?;
            Ok(run.video.clone())
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new(Some("an old wizard".into()), Some("Hello there".into())).unwrap()
    }

    async fn run_with(stages: Arc<dyn StageRunner>, root: &Path) -> (RunOutcome, Vec<ProgressEvent>) {
        let pipeline = Pipeline::new(stages, OutputLayout::new(root));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = pipeline.run(request(), ProgressSink::new(tx)).await;
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        (outcome, events)
    }

    fn checkpoints(events: &[ProgressEvent]) -> Vec<(u8, Stage, Status)> {
        events.iter().map(|e| (e.progress(), e.stage(), e.status())).collect()
    }

    #[tokio::test]
    async fn test_success_emits_every_checkpoint_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let stages = Arc::new(FakeStages::default());

        let (outcome, events) = run_with(stages.clone(), tmp.path()).await;

        assert_eq!(
            checkpoints(&events),
            vec![
                (10, Stage::Prompt, Status::InProgress),
                (25, Stage::Prompt, Status::Complete),
                (25, Stage::Image, Status::InProgress),
                (50, Stage::Image, Status::Complete),
                (50, Stage::Audio, Status::InProgress),
                (75, Stage::Audio, Status::Complete),
                (75, Stage::Video, Status::InProgress),
                (100, Stage::Video, Status::Complete),
            ]
        );
        assert!(events.windows(2).all(|w| w[0].progress() <= w[1].progress()));
        assert_eq!(stages.calls(), Stage::PIPELINE.to_vec());

        let last = events.last().unwrap();
        assert!(last.total_time().is_some());
        assert!(events[..events.len() - 1].iter().all(|e| e.total_time().is_none()));

        let video = match outcome {
            RunOutcome::Completed(video) => video,
            other => panic!("expected completion, got {other:?}"),
        };
        assert!(video.exists());
        assert!(last.message().ends_with(&*video.file_name().unwrap().to_string_lossy()));
        assert!(!tmp.path().join("runs").read_dir().unwrap().any(|_| true));
    }

    #[tokio::test]
    async fn test_failure_emits_single_error_and_stops() {
        let tmp = tempfile::tempdir().unwrap();
        let stages = Arc::new(FakeStages {
            fail_at: Some(Stage::Image),
            ..Default::default()
        });

        let (outcome, events) = run_with(stages.clone(), tmp.path()).await;

        assert_eq!(
            checkpoints(&events),
            vec![
                (10, Stage::Prompt, Status::InProgress),
                (25, Stage::Prompt, Status::Complete),
                (25, Stage::Image, Status::InProgress),
                (0, Stage::Error, Status::Error),
            ]
        );
        assert_eq!(events.last().unwrap().message(), "Error: Image collaborator down");
        assert_eq!(stages.calls(), vec![Stage::Prompt, Stage::Image]);
        assert_eq!(outcome, RunOutcome::Failed("Image collaborator down".into()));
        assert!(events.iter().all(|e| e.progress() != 100));
    }

    #[tokio::test]
    async fn test_panicking_stage_becomes_error_event() {
        let tmp = tempfile::tempdir().unwrap();
        let stages = Arc::new(FakeStages {
            panic_at: Some(Stage::Audio),
            ..Default::default()
        });

        let (outcome, events) = run_with(stages, tmp.path()).await;

        let errors: Vec<_> = events.iter().filter(|e| e.status() == Status::Error).collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message().contains("Stage worker failed"));
        assert!(matches!(outcome, RunOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_disconnected_client_cancels_before_next_stage() {
        let tmp = tempfile::tempdir().unwrap();
        let stages = Arc::new(FakeStages::default());
        let pipeline = Pipeline::new(stages.clone(), OutputLayout::new(tmp.path()));
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        let outcome = pipeline.run(request(), ProgressSink::new(tx)).await;

        assert_eq!(outcome, RunOutcome::Cancelled);
        assert!(stages.calls().is_empty());
    }

    struct Wizard;

    impl LanguageModel for Wizard {
        fn generate(&self, _: &str, _: &str) -> Result<String> {
            Ok(r#"{"prompt": "photo of a wizard"}"#.into())
        }
    }

    struct Portrait;

    impl ImageModel for Portrait {
        fn generate(&self, _: &str, _: ComputeDevice) -> Result<DynamicImage> {
            Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([180, 140, 110]))))
        }
    }

    struct Voice;

    impl SpeechSynth for Voice {
        fn synthesize(&self, _: &str) -> Result<Vec<u8>> {
            Ok(b"ID3".to_vec())
        }
    }

    struct Tone;

    impl AudioTranscoder for Tone {
        fn transcode(&self, _: &Path, output: &Path, spec: AudioSpec) -> Result<()> {
            write_tone(output, spec, 0.2);
            Ok(())
        }
    }

    struct Crashing {
        invocations: Arc<AtomicUsize>,
    }

    impl LipSyncProcess for Crashing {
        fn command(&self, _: &Path, _: &Path, _: &Path) -> Command {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            let mut cmd = Command::new("sh");
            cmd.args(["-c", "echo 'face not detected' >&2; exit 1"]);
            cmd
        }
    }

    #[tokio::test]
    async fn test_lipsync_exit_code_one_fails_run_once() {
        let tmp = tempfile::tempdir().unwrap();
        let invocations = Arc::new(AtomicUsize::new(0));
        let stages = Stages::new(
            Box::new(Wizard),
            Box::new(Portrait),
            ComputeDevice::Cpu,
            Box::new(Voice),
            Box::new(Tone),
            Box::new(Crashing {
                invocations: invocations.clone(),
            }),
        );

        let (outcome, events) = run_with(Arc::new(stages), tmp.path()).await;

        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        let errors: Vec<_> = events.iter().filter(|e| e.status() == Status::Error).collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message().contains("face not detected"));
        assert_eq!(events.last().unwrap().stage(), Stage::Error);
        assert_eq!(events[events.len() - 2].progress(), 75);
        assert!(matches!(outcome, RunOutcome::Failed(_)));
    }

    struct Sleeper;

    impl LipSyncProcess for Sleeper {
        fn command(&self, _: &Path, _: &Path, _: &Path) -> Command {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", "exec sleep 30"]);
            cmd
        }
    }

    #[tokio::test]
    async fn test_disconnect_during_render_kills_lipsync() {
        let tmp = tempfile::tempdir().unwrap();
        let stages = Stages::new(
            Box::new(Wizard),
            Box::new(Portrait),
            ComputeDevice::Cpu,
            Box::new(Voice),
            Box::new(Tone),
            Box::new(Sleeper),
        );
        let pipeline = Pipeline::new(Arc::new(stages), OutputLayout::new(tmp.path()));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let run = tokio::spawn(async move { pipeline.run(request(), ProgressSink::new(tx)).await });
        while let Some(event) = rx.recv().await {
            if event.stage() == Stage::Video {
                break;
            }
        }
        drop(rx);

        let outcome = tokio::time::timeout(std::time::Duration::from_secs(10), run)
            .await
            .expect("lip-sync process was not killed")
            .unwrap();
        assert_eq!(outcome, RunOutcome::Cancelled);
        assert!(!tmp.path().join("videos").read_dir().unwrap().any(|_| true));
    }
}
