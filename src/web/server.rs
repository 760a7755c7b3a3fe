use crate::pipeline::slot::FrameSlot;
use crate::video::recorder::RecorderCommand;
use anyhow::Result;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use crossbeam::channel::Sender;
use opencv::core::{Mat, Vector};
use opencv::imgcodecs;
use opencv::prelude::VectorToVec;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const BOUNDARY: &str = "jpgboundary";
const STREAM_SUFFIX: &str = ".mjpg";
const STREAM_PATH: &str = "/stream.mjpg";
const FRAME_POLL: Duration = Duration::from_millis(5);

/// Shared state for one stream server instance.
pub struct StreamState {
    pub name: &'static str,
    pub slot: Arc<FrameSlot>,
    pub mirror: bool,
    pub recorder: Sender<RecorderCommand>,
    pub shutdown: watch::Receiver<bool>,
}

/// Serve one logical output until the shutdown signal flips.
///
/// Requests for any path ending in `.mjpg` get the live multipart stream;
/// everything else gets a small HTML page embedding it. The recorder
/// control API is mounted under `/api`.
pub async fn run_stream_server(host: IpAddr, port: u16, state: Arc<StreamState>) -> Result<()> {
    let addr = SocketAddr::new(host, port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        "{} stream server listening on http://{}{}",
        state.name,
        addr,
        STREAM_PATH
    );

    let mut shutdown = state.shutdown.clone();
    let app = Router::new()
        .route("/api/screenshot", post(super::api::take_screenshot))
        .route("/api/recording/start", post(super::api::start_recording))
        .route("/api/recording/stop", post(super::api::stop_recording))
        .fallback(stream_or_index)
        .with_state(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;

    Ok(())
}

async fn stream_or_index(State(state): State<Arc<StreamState>>, uri: Uri) -> Response {
    if uri.path().ends_with(STREAM_SUFFIX) {
        mjpeg_stream(state)
    } else {
        index_page(&state).into_response()
    }
}

fn index_page(state: &StreamState) -> Html<String> {
    Html(format!(
        "<html><head><title>facestream: {}</title></head>\
         <body><img src=\"{}\"/></body></html>",
        state.name, STREAM_PATH
    ))
}

/// The live stream: a `multipart/x-mixed-replace` body that emits the
/// latest frame as a JPEG part whenever a new one is published.
///
/// Dropping the connection drops the stream and nothing else; a shutdown
/// signal ends every connection's stream promptly, even ones waiting for
/// the next frame.
fn mjpeg_stream(state: Arc<StreamState>) -> Response {
    let slot = state.slot.clone();
    let mirror = state.mirror;
    let mut shutdown = state.shutdown.clone();

    let body = async_stream::stream! {
        let mut last_seq = 0u64;
        loop {
            if *shutdown.borrow() {
                break;
            }
            let frame = match slot.read(mirror) {
                Ok(Some(frame)) if frame.seq != last_seq => frame,
                Ok(_) => {
                    tokio::select! {
                        _ = tokio::time::sleep(FRAME_POLL) => {}
                        _ = shutdown.changed() => {}
                    }
                    continue;
                }
                Err(e) => {
                    tracing::warn!("stream frame read failed: {e}");
                    break;
                }
            };
            last_seq = frame.seq;

            match encode_jpeg(&frame.mat) {
                Ok(jpeg) => yield Ok::<Bytes, Infallible>(multipart_chunk(&jpeg)),
                Err(e) => tracing::warn!("jpeg encode failed for frame {}: {e}", frame.seq),
            }
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
        )
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body))
        .unwrap()
}

fn encode_jpeg(mat: &Mat) -> Result<Vec<u8>> {
    let mut buf = Vector::<u8>::new();
    imgcodecs::imencode(".jpg", mat, &mut buf, &Vector::new())?;
    Ok(buf.to_vec())
}

/// One boundary-delimited part: headers with the exact payload length,
/// then the JPEG bytes.
fn multipart_chunk(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    let mut chunk = Vec::with_capacity(header.len() + jpeg.len() + 2);
    chunk.extend_from_slice(header.as_bytes());
    chunk.extend_from_slice(jpeg);
    chunk.extend_from_slice(b"\r\n");
    Bytes::from(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multipart_chunk_declares_exact_payload_length() {
        let payload = vec![0xffu8, 0xd8, 0x01, 0x02, 0x03];
        let chunk = multipart_chunk(&payload);
        let text = String::from_utf8_lossy(&chunk);

        assert!(text.starts_with("--jpgboundary\r\n"));
        assert!(text.contains("Content-Type: image/jpeg\r\n"));
        assert!(text.contains(&format!("Content-Length: {}\r\n", payload.len())));

        // The declared length must cover exactly the bytes between the
        // blank line and the trailing CRLF.
        let header_end = chunk
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("header terminator")
            + 4;
        assert_eq!(&chunk[header_end..chunk.len() - 2], payload.as_slice());
    }
}
