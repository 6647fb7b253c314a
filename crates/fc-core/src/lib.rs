pub mod error;
pub mod pipeline;
pub mod progress;
pub mod request;
pub mod run;
pub mod stages;

pub use error::{PipelineError, Result};
pub use pipeline::{Pipeline, RunOutcome};
pub use progress::{Cancellation, ProgressEvent, ProgressSink, Stage, Status};
pub use request::GenerationRequest;
pub use run::{OutputLayout, RunPaths};
pub use stages::{StageRunner, Stages};
