use actix_web::http::header;
use actix_web::web::Bytes;
use actix_web::{web, HttpResponse};
use tokio::sync::mpsc;

use crate::error::ApiError;
use crate::state::AppState;

/// SSE reply to the pending user message.
///
/// The engine stream is synchronous, so it is drained on a blocking thread.
/// When the client goes away the send fails, the stream is dropped and the
/// provider call is cancelled.
pub async fn handler(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let facade = state.facade.clone();
    let stream = web::block(move || facade.stream_response()).await??;
    log::info!("Stream started");

    let (sse_tx, mut sse_rx) = mpsc::channel::<Bytes>(32);

    tokio::task::spawn_blocking(move || {
        let mut frames = 0usize;
        for frame in stream {
            if sse_tx.blocking_send(Bytes::from(frame)).is_err() {
                log::info!("Client disconnected after {} frames", frames);
                return;
            }
            frames += 1;
        }
        log::debug!("Stream finished after {} frames", frames);
    });

    Ok(HttpResponse::Ok()
        .append_header((header::CONTENT_TYPE, "text/event-stream"))
        .append_header((header::CACHE_CONTROL, "no-cache"))
        .append_header((header::CONNECTION, "keep-alive"))
        .streaming(async_stream::stream! {
            while let Some(item) = sse_rx.recv().await {
                yield Ok::<_, actix_web::Error>(item);
            }
        }))
}
