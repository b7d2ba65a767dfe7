#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use manara_api::config::ServerConfig;
use manara_api::handlers::download::proxy_client;
use manara_api::router::build_app_router;
use manara_api::state::AppState;
use manara_core::asset::ArtifactDescriptor;
use manara_core::error::CoreError;
use manara_core::generation::{GenerationParams, ImageInput};
use manara_core::job::{GenerationJob, JobHandle, JobStatus, ProviderKind};
use manara_providers::config::ProviderConfig;
use manara_providers::provider::{GenerationProvider, ProgressReporter, Submission};
use manara_storage::config::StorageConfig;
use manara_storage::materializer::Materializer;

pub const BOUNDARY: &str = "manara-test-boundary";

/// Build a test `ServerConfig` writing uploads under `upload_root`.
pub fn test_config(upload_root: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        max_upload_bytes: 1024 * 1024,
        materialize_attempts: 2,
        proxy_allow_private: true,
        providers: ProviderConfig::default(),
        storage: StorageConfig {
            upload_root: upload_root.to_path_buf(),
            public_base_url: "http://files.test".to_string(),
            ..Default::default()
        },
    }
}

/// What the mock provider returns once a job is submitted.
pub type Outcome = Box<dyn Fn() -> Result<ArtifactDescriptor, CoreError> + Send + Sync>;

/// In-process provider that records calls and returns a scripted outcome.
pub struct MockProvider {
    outcome: Outcome,
    delay: Option<Duration>,
    pub submits: AtomicUsize,
    pub last_params: Mutex<Option<GenerationParams>>,
}

impl MockProvider {
    pub fn new(outcome: Outcome) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            delay: None,
            submits: AtomicUsize::new(0),
            last_params: Mutex::new(None),
        })
    }

    /// A provider whose jobs succeed with a model at `url`.
    pub fn succeeding(url: impl Into<String>) -> Arc<Self> {
        let url = url.into();
        Self::new(Box::new(move || {
            Ok(ArtifactDescriptor::model(url.clone(), false))
        }))
    }

    /// Like [`MockProvider::succeeding`], but each job takes `delay` to finish.
    pub fn slow(url: impl Into<String>, delay: Duration) -> Arc<Self> {
        let url = url.into();
        Arc::new(Self {
            outcome: Box::new(move || Ok(ArtifactDescriptor::model(url.clone(), false))),
            delay: Some(delay),
            submits: AtomicUsize::new(0),
            last_params: Mutex::new(None),
        })
    }

    pub fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationProvider for MockProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::HfQueue
    }

    async fn submit(
        &self,
        input: &ImageInput,
        params: &GenerationParams,
    ) -> Result<Submission, CoreError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        *self.last_params.lock().unwrap() = Some(params.clone());
        Ok(Submission {
            handle: JobHandle::Session {
                session_hash: "mocksession".to_string(),
                event_id: Some("evt-1".to_string()),
            },
            input_asset_ref: format!("{} ({} bytes)", input.mime_type, input.len()),
        })
    }

    async fn wait_for_result(
        &self,
        job: &mut GenerationJob,
        _progress: &ProgressReporter,
        _cancel: &CancellationToken,
    ) -> Result<ArtifactDescriptor, CoreError> {
        job.advance(JobStatus::Running)?;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.outcome)()
    }
}

/// Build the full application router around `provider`.
///
/// Uses the same [`build_app_router`] as `main.rs` so integration tests
/// exercise the production middleware stack.
pub fn build_test_app(provider: Arc<dyn GenerationProvider>, upload_root: &Path) -> Router {
    build_test_app_with(provider, test_config(upload_root))
}

pub fn build_test_app_with(provider: Arc<dyn GenerationProvider>, config: ServerConfig) -> Router {
    let materializer =
        Materializer::new(config.storage.clone()).expect("materializer builds in tests");
    let state = AppState {
        config: Arc::new(config.clone()),
        provider,
        materializer: Arc::new(materializer),
        http: proxy_client(config.proxy_allow_private).expect("proxy client builds in tests"),
    };
    build_app_router(state, &config)
}

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Send a GET request through the router.
pub async fn get(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

/// A form field for [`post_multipart`].
pub enum Part<'a> {
    Text(&'a str, &'a str),
    File {
        name: &'a str,
        file_name: &'a str,
        content_type: &'a str,
        bytes: &'a [u8],
    },
}

/// Encode `parts` as a `multipart/form-data` body.
pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File {
                name,
                file_name,
                content_type,
                bytes,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                         Content-Type: {content_type}\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// POST a multipart form through the router.
pub async fn post_multipart(app: Router, uri: &str, parts: &[Part<'_>]) -> Response<Body> {
    let request = Request::post(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// A PNG-labelled image part named `image`.
pub fn png_image(bytes: &[u8]) -> Part<'_> {
    Part::File {
        name: "image",
        file_name: "room.png",
        content_type: "image/png",
        bytes,
    }
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// All regular files under `root`, recursively.
pub fn files_under(root: &Path) -> Vec<std::path::PathBuf> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(root) else {
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            found.extend(files_under(&path));
        } else {
            found.push(path);
        }
    }
    found
}
