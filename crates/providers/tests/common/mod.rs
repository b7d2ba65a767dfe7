#![allow(dead_code)]

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::response::Response;
use axum::Router;
use bytes::Bytes;
use futures::{Stream, StreamExt};

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// One SSE block carrying `payload` as its data line.
pub fn frame(payload: &str) -> String {
    format!("data: {payload}\n\n")
}

/// An SSE response whose body is `chunks`, sent in order.
pub fn sse_response<S>(chunks: S) -> Response
where
    S: Stream<Item = Bytes> + Send + 'static,
{
    Response::builder()
        .header(CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(chunks.map(Ok::<_, Infallible>)))
        .unwrap()
}

/// Split `text` into `size`-byte chunks, ignoring UTF-8 boundaries.
pub fn chunked(text: &str, size: usize) -> Vec<Bytes> {
    text.as_bytes()
        .chunks(size)
        .map(Bytes::copy_from_slice)
        .collect()
}

/// Flag set when the owning value is dropped.
pub struct DropFlag(pub Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Endless heartbeat stream that flips `dropped` once the server discards it.
pub fn endless_heartbeats(dropped: Arc<AtomicBool>) -> impl Stream<Item = Bytes> + Send + 'static {
    let guard = DropFlag(dropped);
    futures::stream::unfold((), |_| async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Some((Bytes::from(frame(r#"{"msg":"heartbeat"}"#)), ()))
    })
    .map(move |chunk| {
        let _held = &guard;
        chunk
    })
}

/// Wait up to `limit` for `flag` to become true.
pub async fn wait_for_flag(flag: &AtomicBool, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if flag.load(Ordering::SeqCst) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    flag.load(Ordering::SeqCst)
}
