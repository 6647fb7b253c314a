use std::io;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures::{Stream, StreamExt, future, stream};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};

use fc_core::progress::encode_sse;
use fc_core::{GenerationRequest, ProgressEvent, ProgressSink, RunOutcome};

use crate::error::AppError;
use crate::server::schemas::GenerateParams;
use crate::server::state::AppState;

/// Sent ahead of any event while the request waits for a free run slot.
const QUEUED_COMMENT: &[u8] = b": queued\n\n";

/// Start a run and stream its progress as server-sent events.
///
/// The stream ends after the terminal event. A request that has to wait for a
/// run slot first receives an SSE comment, which clients ignore.
///
/// Dropping the connection closes the progress channel. The run stops at the
/// next stage boundary, and a lip-sync render in flight is killed.
pub async fn generate(
    State(state): State<Arc<AppState>>,
    Query(params): Query<GenerateParams>,
) -> Result<Response, AppError> {
    let request = GenerationRequest::new(params.characterstics, params.script)?;

    let (tx, rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let pipeline = state.pipeline.clone();
    let permits = state.permits();
    let queued = permits.available_permits() == 0;

    tokio::spawn(async move {
        let events = ProgressSink::new(tx);
        let _permit = match permits.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!("Run queue closed, dropping request");
                return;
            }
        };
        if events.is_closed() {
            info!("Client left before its run started");
            return;
        }

        info!(
            "Generating avatar for '{}' ({} chars of script)",
            request.character_description,
            request.script.len()
        );
        match pipeline.run(request, events).await {
            RunOutcome::Completed(video) => info!("Video ready at {}", video.display()),
            RunOutcome::Failed(reason) => warn!("Run failed: {}", reason),
            RunOutcome::Cancelled => info!("Run cancelled by client"),
        }
    });

    let events = until_terminal(UnboundedReceiverStream::new(rx)).map(|event| {
        encode_sse(&event)
            .map(Bytes::from)
            .map_err(|e| io::Error::other(e.to_string()))
    });
    let preamble = queued.then(|| Ok::<_, io::Error>(Bytes::from_static(QUEUED_COMMENT)));
    let body = stream::iter(preamble).chain(events);

    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    Ok(response)
}

/// Pass events through up to and including the first terminal one.
fn until_terminal<S>(events: S) -> impl Stream<Item = ProgressEvent>
where
    S: Stream<Item = ProgressEvent>,
{
    events.scan(false, |finished, event| {
        if *finished {
            return future::ready(None);
        }
        *finished = event.is_terminal();
        future::ready(Some(event))
    })
}
