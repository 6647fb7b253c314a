use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Prompt,
    Image,
    Audio,
    Video,
    Error,
}

impl Stage {
    /// The four pipeline stages in execution order.
    pub const PIPELINE: [Stage; 4] = [Self::Prompt, Self::Image, Self::Audio, Self::Video];

    /// Progress reported when the stage starts.
    pub fn entry_progress(&self) -> u8 {
        match self {
            Self::Prompt => 10,
            Self::Image => 25,
            Self::Audio => 50,
            Self::Video => 75,
            Self::Error => 0,
        }
    }

    /// Progress reported when the stage completes.
    pub fn exit_progress(&self) -> u8 {
        match self {
            Self::Prompt => 25,
            Self::Image => 50,
            Self::Audio => 75,
            Self::Video => 100,
            Self::Error => 0,
        }
    }

    fn started_message(&self) -> &'static str {
        match self {
            Self::Prompt => "Generating image prompt...",
            Self::Image => "Generating avatar image...",
            Self::Audio => "Generating voiceover...",
            Self::Video => "Generating final video...",
            Self::Error => "Error",
        }
    }

    fn finished_message(&self) -> &'static str {
        match self {
            Self::Prompt => "Image prompt generated.",
            Self::Image => "Avatar image generated.",
            Self::Audio => "Voiceover generated.",
            Self::Video => "Video generated.",
            Self::Error => "Error",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    InProgress,
    Complete,
    Error,
}

/// A single progress update streamed to the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressEvent {
    progress: u8,
    message: String,
    stage: Stage,
    status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "fixed_seconds")]
    total_time: Option<f64>,
}

impl ProgressEvent {
    pub fn started(stage: Stage) -> Self {
        Self::new(stage.entry_progress(), stage.started_message(), stage, Status::InProgress)
    }

    pub fn finished(stage: Stage) -> Self {
        Self::new(stage.exit_progress(), stage.finished_message(), stage, Status::Complete)
    }

    /// Terminal success event. The message carries the retrievable video URL.
    pub fn done(video_url: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            total_time: Some(elapsed.as_secs_f64()),
            ..Self::new(Stage::Video.exit_progress(), video_url, Stage::Video, Status::Complete)
        }
    }

    /// Terminal failure event.
    pub fn failed(reason: impl std::fmt::Display) -> Self {
        Self::new(0, format!("Error: {reason}"), Stage::Error, Status::Error)
    }

    fn new(progress: u8, message: impl Into<String>, stage: Stage, status: Status) -> Self {
        Self {
            progress: progress.min(100),
            message: message.into(),
            stage,
            status,
            total_time: None,
        }
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn total_time(&self) -> Option<f64> {
        self.total_time
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        self.status == Status::Error || (self.stage == Stage::Video && self.progress == 100)
    }
}

/// Encode an event as one server-sent-events message.
pub fn encode_sse(event: &ProgressEvent) -> Result<String> {
    Ok(format!("data: {}\n\n", serde_json::to_string(event)?))
}

/// Sending half of a run's progress channel.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: UnboundedSender<ProgressEvent>,
}

impl ProgressSink {
    pub fn new(tx: UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }

    /// Hand an event to the stream writer. Fails with `Cancelled` once the
    /// receiving side has gone away.
    pub fn emit(&self, event: ProgressEvent) -> Result<()> {
        self.tx.send(event).map_err(|_| PipelineError::Cancelled)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// A handle long-running stage work can poll to notice the client leaving.
    pub fn cancellation(&self) -> Cancellation {
        Cancellation {
            events: Some(self.clone()),
        }
    }
}

/// Tells blocking stage work whether the run has been abandoned.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    events: Option<ProgressSink>,
}

impl Cancellation {
    /// A handle that is never cancelled.
    pub fn never() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.events.as_ref().is_some_and(ProgressSink::is_closed)
    }
}

/// `total_time` travels as a string with two decimals.
mod fixed_seconds {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(secs) => serializer.serialize_str(&format!("{secs:.2}")),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| s.parse::<f64>().map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn payload(event: &ProgressEvent) -> Value {
        let sse = encode_sse(event).unwrap();
        let json = sse.strip_prefix("data: ").unwrap().strip_suffix("\n\n").unwrap();
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_checkpoints_chain() {
        let mut last_exit = 10;
        for stage in Stage::PIPELINE {
            assert!(stage.entry_progress() <= stage.exit_progress());
            if stage != Stage::Prompt {
                assert_eq!(stage.entry_progress(), last_exit);
            }
            last_exit = stage.exit_progress();
        }
        assert_eq!(last_exit, 100);
    }

    #[test]
    fn test_started_event_wire_shape() {
        let value = payload(&ProgressEvent::started(Stage::Image));
        assert_eq!(value["progress"], 25);
        assert_eq!(value["message"], "Generating avatar image...");
        assert_eq!(value["stage"], "image");
        assert_eq!(value["status"], "in_progress");
        assert!(value.get("total_time").is_none());
    }

    #[test]
    fn test_done_event_has_fixed_total_time() {
        let event = ProgressEvent::done("/output/videos/a.mp4", Duration::from_millis(12_345));
        let value = payload(&event);
        assert_eq!(value["progress"], 100);
        assert_eq!(value["message"], "/output/videos/a.mp4");
        assert_eq!(value["stage"], "video");
        assert_eq!(value["status"], "complete");
        assert_eq!(value["total_time"], "12.35");
        assert!(event.is_terminal());
    }

    #[test]
    fn test_failed_event() {
        let event = ProgressEvent::failed("boom");
        let value = payload(&event);
        assert_eq!(value["progress"], 0);
        assert_eq!(value["message"], "Error: boom");
        assert_eq!(value["stage"], "error");
        assert_eq!(value["status"], "error");
        assert!(event.is_terminal());
    }

    #[test]
    fn test_decodes_streamed_event() {
        let event = ProgressEvent::done("/output/videos/b.mp4", Duration::from_secs(3));
        let sse = encode_sse(&event).unwrap();
        let decoded: ProgressEvent =
            serde_json::from_str(sse.trim_start_matches("data: ").trim_end()).unwrap();
        assert_eq!(decoded.total_time(), Some(3.0));
        assert_eq!(decoded.message(), event.message());
    }

    #[test]
    fn test_sink_reports_closed_receiver() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = ProgressSink::new(tx);
        sink.emit(ProgressEvent::started(Stage::Prompt)).unwrap();
        drop(rx);
        assert!(sink.is_closed());
        assert!(sink.cancellation().is_cancelled());
        assert!(!Cancellation::never().is_cancelled());
        assert!(matches!(
            sink.emit(ProgressEvent::finished(Stage::Prompt)),
            Err(PipelineError::Cancelled)
        ));
    }
}
