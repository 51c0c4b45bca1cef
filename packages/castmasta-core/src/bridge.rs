//! Local media bridge.
//!
//! Cast devices cannot read the caller's filesystem; they fetch media by URL.
//! The bridge exposes exactly one registered file over HTTP at
//! `GET /media/{filename}` so a device can stream a local file as if it were
//! remote.
//!
//! # Exposure rules
//!
//! - The listener binds all interfaces (devices are on the LAN, not loopback).
//! - Only the currently registered file is ever served. Any other path,
//!   including `/media/` with a different or traversal-shaped name, is 404.
//! - Registering a new file replaces the previous registration.

use std::net::SocketAddr;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use parking_lot::RwLock;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use crate::context::{detect_or_loopback, IpDetector, UrlBuilder};
use crate::error::{CastError, CastResult};

/// Default bridge port.
pub const DEFAULT_BRIDGE_PORT: u16 = 8089;

/// The single file currently exposed.
#[derive(Debug, Clone)]
struct Registration {
    path: PathBuf,
    file_name: String,
}

type SharedRegistration = Arc<RwLock<Option<Registration>>>;

struct RunningServer {
    port: u16,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Ephemeral single-file HTTP server.
///
/// One bridge is shared by every Cast backend in the process, which keeps the
/// "one registered file" rule process-wide.
pub struct MediaBridge {
    port: u16,
    ip_detector: Arc<dyn IpDetector>,
    registration: SharedRegistration,
    server: Mutex<Option<RunningServer>>,
}

impl MediaBridge {
    /// Creates a bridge that will listen on `port` (0 = OS-assigned).
    ///
    /// Nothing is bound until the first [`serve`](Self::serve).
    pub fn new(port: u16, ip_detector: Arc<dyn IpDetector>) -> Self {
        Self {
            port,
            ip_detector,
            registration: Arc::new(RwLock::new(None)),
            server: Mutex::new(None),
        }
    }

    /// Registers `path` as the exposed file and returns its absolute URL.
    ///
    /// Starts the listener if it is not running; reuses it otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`CastError::Bridge`] if the path has no usable file name or
    /// the listener cannot bind.
    pub async fn serve(&self, path: &FsPath) -> CastResult<String> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                CastError::Bridge(format!("{} has no usable file name", path.display()))
            })?;

        *self.registration.write() = Some(Registration {
            path: path.to_path_buf(),
            file_name: file_name.clone(),
        });

        let port = self.ensure_listening().await?;
        let ip = detect_or_loopback(self.ip_detector.as_ref());
        let url = UrlBuilder::new(ip, port).media_url(&file_name);

        log::info!("[Bridge] Serving {} at {}", path.display(), url);
        Ok(url)
    }

    async fn ensure_listening(&self) -> CastResult<u16> {
        let mut server = self.server.lock().await;
        if let Some(running) = server.as_ref() {
            if !running.handle.is_finished() {
                return Ok(running.port);
            }
            log::warn!("[Bridge] Listener on port {} had stopped, restarting", running.port);
        }

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| CastError::Bridge(format!("failed to bind {}: {}", addr, e)))?;
        let port = listener
            .local_addr()
            .map_err(|e| CastError::Bridge(e.to_string()))?
            .port();

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let app = create_router(Arc::clone(&self.registration));
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = result {
                log::error!("[Bridge] Server error: {}", e);
            }
        });

        log::info!("[Bridge] Listening on http://0.0.0.0:{}", port);
        *server = Some(RunningServer {
            port,
            cancel,
            handle,
        });
        Ok(port)
    }

    /// Drops the registration and stops the listener.
    ///
    /// Idempotent. When this returns the port is free again.
    pub async fn shutdown(&self) {
        self.registration.write().take();

        let running = self.server.lock().await.take();
        if let Some(running) = running {
            running.cancel.cancel();
            // Graceful shutdown waits on in-flight downloads; abort them.
            running.handle.abort();
            let _ = running.handle.await;
            log::info!("[Bridge] Stopped listener on port {}", running.port);
        }
    }

    /// Bound port, if the listener is running.
    pub async fn local_port(&self) -> Option<u16> {
        self.server.lock().await.as_ref().map(|s| s.port)
    }

    /// Path of the currently exposed file.
    pub fn registered_file(&self) -> Option<PathBuf> {
        self.registration.read().as_ref().map(|r| r.path.clone())
    }
}

/// Guesses a MIME type from a file extension.
pub fn guess_content_type(path: &FsPath) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "mp3" => "audio/mpeg",
        "wav" => "audio/x-wav",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "mp4" => "video/mp4",
        "m4v" => "video/x-m4v",
        "mov" => "video/quicktime",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        _ => return None,
    };
    Some(mime)
}

fn create_router(registration: SharedRegistration) -> Router {
    Router::new()
        .route("/media/{filename}", get(serve_media))
        .fallback(not_found)
        .with_state(registration)
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// GET /media/{filename}
///
/// Serves the registered file if and only if `filename` matches it exactly.
async fn serve_media(
    Path(file_name): Path<String>,
    State(registration): State<SharedRegistration>,
) -> Response {
    let current = registration.read().clone();
    let registered = match current {
        Some(r) if r.file_name == file_name => r,
        _ => {
            log::debug!("[Bridge] Rejected request for '{}'", file_name);
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    let file = match tokio::fs::File::open(&registered.path).await {
        Ok(f) => f,
        Err(e) => {
            log::warn!(
                "[Bridge] Registered file {} unreadable: {}",
                registered.path.display(),
                e
            );
            return StatusCode::NOT_FOUND.into_response();
        }
    };
    let size = match file.metadata().await {
        Ok(meta) => meta.len(),
        Err(e) => {
            log::warn!("[Bridge] Cannot stat {}: {}", registered.path.display(), e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let content_type =
        guess_content_type(&registered.path).unwrap_or("application/octet-stream");
    log::debug!(
        "[Bridge] Streaming {} ({} bytes, {})",
        registered.file_name,
        size,
        content_type
    );

    Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, size)
        .body(Body::from_stream(ReaderStream::new(file)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
