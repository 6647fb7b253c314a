use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info, warn};

use crate::error::{PipelineError, Result};
use crate::progress::Cancellation;
use crate::stages::audio::{AudioSpec, ensure_spec};
use crate::stages::LipSyncProcess;

const RESULT_EXTENSION: &str = "mp4";
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Animate `image` with `audio` through the external lip-sync process and
/// move the rendered clip to `final_path`.
///
/// The process gets no timeout; renders routinely take several minutes. It is
/// killed if `cancel` fires while it runs.
pub fn animate(
    lipsync: &dyn LipSyncProcess,
    image: &Path,
    audio: &Path,
    result_dir: &Path,
    final_path: &Path,
    cancel: &Cancellation,
) -> Result<PathBuf> {
    let image = std::path::absolute(image)?;
    let audio = std::path::absolute(audio)?;
    let result_dir = std::path::absolute(result_dir)?;

    for input in [&image, &audio] {
        if !input.is_file() {
            return Err(PipelineError::NotFound(input.clone()));
        }
    }

    let duration = ensure_spec(&audio, AudioSpec::ANIMATION)?;
    let estimate_secs = duration.as_secs_f64() * 3.0 + 30.0;
    info!(
        "Audio duration {:.2}s, estimated render time ~{:.1} minutes",
        duration.as_secs_f64(),
        estimate_secs / 60.0
    );

    std::fs::create_dir_all(&result_dir)?;
    clear_results(&result_dir)?;

    let mut command = lipsync.command(&audio, &image, &result_dir);
    info!("Running lip-sync process: {:?}", command);
    let output = run_until_cancelled(&mut command, cancel)?;

    if !output.status.success() {
        let err = PipelineError::process_failed(
            format!("Lip-sync video generation failed ({})", output.status),
            &output,
        );
        error!("{}", err);
        return Err(err);
    }

    let produced = result_files(&result_dir)?
        .into_iter()
        .next()
        .ok_or_else(|| {
            PipelineError::process_failed("Lip-sync process did not produce a video file", &output)
        })?;

    if let Some(parent) = final_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    relocate(&produced, final_path)?;
    info!("Lip-synced video saved to {}", final_path.display());

    Ok(final_path.to_path_buf())
}

/// Like `Command::output`, but polls `cancel` while the child runs and kills
/// it when the run is abandoned.
fn run_until_cancelled(command: &mut Command, cancel: &Cancellation) -> Result<Output> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| PipelineError::Collaborator(format!("Failed to start lip-sync process: {e}")))?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if cancel.is_cancelled() {
            warn!("Client disconnected, killing lip-sync process {}", child.id());
            child.kill()?;
            child.wait()?;
            // Grandchildren may still hold the pipes; the readers are left to finish on their own.
            return Err(PipelineError::Cancelled);
        }
        thread::sleep(POLL_INTERVAL);
    };

    Ok(Output {
        status,
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// Result clips in `dir`, sorted by file name.
fn result_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_clip = path.extension().is_some_and(|ext| ext == RESULT_EXTENSION);
        if is_clip && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn clear_results(dir: &Path) -> Result<()> {
    for stale in result_files(dir)? {
        warn!("Removing stale result {}", stale.display());
        std::fs::remove_file(stale)?;
    }
    Ok(())
}

fn relocate(from: &Path, to: &Path) -> Result<()> {
    if std::fs::rename(from, to).is_err() {
        // Different filesystems.
        std::fs::copy(from, to)?;
        std::fs::remove_file(from)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressSink;
    use crate::stages::audio::tests::write_tone;
    use std::time::Instant;

    /// Runs a shell snippet with the standard lip-sync arguments appended.
    /// `$RESULT_DIR` is set from `--result_dir` before the snippet runs.
    struct ShellLipSync(&'static str);

    impl LipSyncProcess for ShellLipSync {
        fn command(&self, audio: &Path, image: &Path, result_dir: &Path) -> Command {
            let script = format!(
                r#"while [ $# -gt 0 ]; do case "$1" in --result_dir) RESULT_DIR="$2"; shift;; esac; shift; done; {}"#,
                self.0
            );
            let mut cmd = Command::new("sh");
            cmd.arg("-c")
                .arg(script)
                .arg("lipsync")
                .arg("--driven_audio")
                .arg(audio)
                .arg("--source_image")
                .arg(image)
                .arg("--result_dir")
                .arg(result_dir)
                .args(["--still", "--preprocess", "full"]);
            cmd
        }
    }

    struct Inputs {
        _tmp: tempfile::TempDir,
        image: PathBuf,
        audio: PathBuf,
        results: PathBuf,
        video: PathBuf,
    }

    fn inputs() -> Inputs {
        let tmp = tempfile::tempdir().unwrap();
        let image = tmp.path().join("source_image.png");
        std::fs::write(&image, b"png").unwrap();
        let audio = tmp.path().join("audio.wav");
        write_tone(&audio, AudioSpec::ANIMATION, 0.2);
        let results = tmp.path().join("results");
        std::fs::create_dir_all(&results).unwrap();
        let video = tmp.path().join("videos/final.mp4");
        Inputs {
            image,
            audio,
            results,
            video,
            _tmp: tmp,
        }
    }

    fn animate_inputs(lipsync: &ShellLipSync, io: &Inputs) -> Result<PathBuf> {
        animate(lipsync, &io.image, &io.audio, &io.results, &io.video, &Cancellation::never())
    }

    #[test]
    fn test_clears_stale_results_and_moves_fresh_clip() {
        let io = inputs();
        std::fs::write(io.results.join("a_stale.mp4"), b"old run").unwrap();
        std::fs::write(io.results.join("b_stale.mp4"), b"old run").unwrap();
        let lipsync = ShellLipSync(
            r#"ls "$RESULT_DIR"/*.mp4 >/dev/null 2>&1 && exit 3; printf 'this run' > "$RESULT_DIR/z_fresh.mp4""#,
        );

        let path = animate_inputs(&lipsync, &io).unwrap();

        assert_eq!(path, io.video);
        assert_eq!(std::fs::read_to_string(&io.video).unwrap(), "this run");
        assert!(result_files(&io.results).unwrap().is_empty());
    }

    #[test]
    fn test_selects_lexicographically_first_clip() {
        let io = inputs();
        let lipsync = ShellLipSync(
            r#"printf second > "$RESULT_DIR/2.mp4"; printf first > "$RESULT_DIR/1.mp4"; printf log > "$RESULT_DIR/0.txt""#,
        );

        animate_inputs(&lipsync, &io).unwrap();

        assert_eq!(std::fs::read_to_string(&io.video).unwrap(), "first");
    }

    #[test]
    fn test_nonzero_exit_carries_output() {
        let io = inputs();
        let lipsync = ShellLipSync(r#"echo "loading model"; echo "CUDA error" >&2; exit 1"#);

        let err = animate_inputs(&lipsync, &io).unwrap_err();

        match &err {
            PipelineError::ExternalProcess { stdout, stderr, .. } => {
                assert!(stdout.contains("loading model"));
                assert!(stderr.contains("CUDA error"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("CUDA error"));
        assert!(!io.video.exists());
    }

    #[test]
    fn test_missing_output_is_a_process_error() {
        let io = inputs();
        let lipsync = ShellLipSync("true");

        let err = animate_inputs(&lipsync, &io).unwrap_err();

        assert!(matches!(err, PipelineError::ExternalProcess { .. }));
        assert!(err.to_string().contains("did not produce a video file"));
    }

    #[test]
    fn test_missing_inputs_fail_before_running() {
        let io = inputs();
        std::fs::remove_file(&io.image).unwrap();
        let lipsync = ShellLipSync(r#"printf ran > "$RESULT_DIR/x.mp4""#);

        let err = animate_inputs(&lipsync, &io).unwrap_err();

        assert!(matches!(err, PipelineError::NotFound(_)));
        assert!(result_files(&io.results).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_audio_in_wrong_layout() {
        let io = inputs();
        write_tone(&io.audio, AudioSpec { sample_rate: 22_050, channels: 2 }, 0.1);
        let lipsync = ShellLipSync(r#"printf ran > "$RESULT_DIR/x.mp4""#);

        let err = animate_inputs(&lipsync, &io).unwrap_err();

        assert!(matches!(err, PipelineError::AudioFormat { .. }));
    }

    #[test]
    fn test_abandoned_run_kills_lipsync_process() {
        let io = inputs();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = ProgressSink::new(tx);
        let lipsync = ShellLipSync(r#"exec sleep 30"#);

        let dropper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            drop(rx);
        });
        let started = Instant::now();
        let err = animate(&lipsync, &io.image, &io.audio, &io.results, &io.video, &sink.cancellation())
            .unwrap_err();
        dropper.join().unwrap();

        assert!(matches!(err, PipelineError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!io.video.exists());
    }
}
