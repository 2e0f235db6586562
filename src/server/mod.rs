//! Development HTTP server
//!
//! Serves the build output directory on localhost and, when live reload is
//! enabled, pushes rebuild-completed notifications to connected browsers
//! over a server-sent-events endpoint (`/__livereload`). The server is a
//! passive observer of the pipeline: it subscribes to rebuild notices and
//! never triggers a rebuild itself. A rebuild failure leaves it serving the
//! last good output.
//!
//! Lifecycle is `Stopped -> Starting -> Serving -> Stopped`; binding is
//! separate from serving so a bind failure (`PortInUse`) leaves no
//! partially-started server behind, and responses in flight finish before
//! shutdown completes.

use crate::pipeline::scheduler::RebuildNotice;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures_util::StreamExt;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

/// Path browser clients poll for rebuild notifications
pub const LIVE_RELOAD_PATH: &str = "/__livereload";

/// Dev server errors. Port conflicts are surfaced to the operator instead
/// of retrying on another port; predictable addressing wins over
/// convenience.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Port {port} is already in use")]
    PortInUse { port: u16 },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Server lifecycle states. There is no paused state: rebuild failures keep
/// the server `Serving` the last good output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Serving,
}

struct Shared {
    root: PathBuf,
    compress: bool,
    live_reload: bool,
    reload: broadcast::Sender<RebuildNotice>,
}

/// A bound dev server ready to accept connections.
pub struct DevServer {
    listener: TcpListener,
    addr: SocketAddr,
    state: ServerState,
    shared: Arc<Shared>,
}

impl DevServer {
    /// Binds the listener. `reload` is the pipeline's rebuild notification
    /// channel; each SSE client gets its own subscription.
    pub async fn bind(
        port: u16,
        output_dir: impl Into<PathBuf>,
        live_reload: bool,
        compress: bool,
        reload: broadcast::Sender<RebuildNotice>,
    ) -> Result<Self, ServerError> {
        let requested: SocketAddr = ([127, 0, 0, 1], port).into();
        debug!(addr = %requested, "Dev server starting");
        let listener = TcpListener::bind(requested).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::AddrInUse {
                ServerError::PortInUse { port }
            } else {
                ServerError::Bind {
                    addr: requested,
                    source,
                }
            }
        })?;
        let addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: requested,
            source,
        })?;

        Ok(Self {
            listener,
            addr,
            state: ServerState::Starting,
            shared: Arc::new(Shared {
                root: output_dir.into(),
                compress,
                live_reload,
                reload,
            }),
        })
    }

    /// Actual bound address (useful when binding port 0 in tests).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Accept loop. Returns once the shutdown signal fires; connections in
    /// flight finish on their own tasks.
    pub async fn serve(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), ServerError> {
        self.state = ServerState::Serving;
        info!(addr = %self.addr, root = %self.shared.root.display(), "Dev server serving");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(peer = %peer, "Connection accepted");
                            let shared = self.shared.clone();
                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req| handle(req, shared.clone()));
                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await
                                {
                                    debug!(error = %e, "Connection ended with error");
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "Accept failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.state = ServerState::Stopped;
        info!("Dev server stopped");
        Ok(())
    }
}

type ResponseBody = BoxBody<Bytes, Infallible>;

async fn handle(
    req: Request<Incoming>,
    shared: Arc<Shared>,
) -> Result<Response<ResponseBody>, Infallible> {
    if req.method() != Method::GET && req.method() != Method::HEAD {
        return Ok(status_response(StatusCode::METHOD_NOT_ALLOWED));
    }

    let path = req.uri().path();
    if path == LIVE_RELOAD_PATH {
        if !shared.live_reload {
            return Ok(status_response(StatusCode::NOT_FOUND));
        }
        return Ok(sse_response(&shared));
    }

    let Some(relative) = sanitize(path) else {
        return Ok(status_response(StatusCode::NOT_FOUND));
    };

    let mut file = shared.root.join(relative);
    if file.is_dir() || path.ends_with('/') {
        file = file.join("index.html");
    }

    let bytes = match tokio::fs::read(&file).await {
        Ok(bytes) => bytes,
        Err(_) => {
            debug!(path = %file.display(), "Not found");
            return Ok(status_response(StatusCode::NOT_FOUND));
        }
    };

    let content_type = content_type_for(&file);
    let accepts_gzip = req
        .headers()
        .get(header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("gzip"));

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type);

    let body = if shared.compress && accepts_gzip && is_compressible(content_type) {
        builder = builder.header(header::CONTENT_ENCODING, "gzip");
        gzip(&bytes)
    } else {
        bytes
    };

    Ok(builder
        .body(Full::new(Bytes::from(body)).boxed())
        .expect("static response headers are valid"))
}

fn sse_response(shared: &Shared) -> Response<ResponseBody> {
    let events = BroadcastStream::new(shared.reload.subscribe()).map(|event| {
        // A lagged subscriber missed some notices; telling it to reload
        // is exactly the right recovery either way.
        let frame = match event {
            Ok(notice) => format!("data: reload {}\n\n", notice.pass),
            Err(_) => "data: reload\n\n".to_string(),
        };
        Ok::<_, Infallible>(Frame::data(Bytes::from(frame)))
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(BodyExt::boxed(StreamBody::new(events)))
        .expect("sse response headers are valid")
}

fn status_response(status: StatusCode) -> Response<ResponseBody> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::new()).boxed())
        .expect("empty response is valid")
}

/// Maps a request path to a relative filesystem path, rejecting anything
/// that would escape the output directory.
fn sanitize(path: &str) -> Option<PathBuf> {
    let trimmed = path.trim_start_matches('/');
    let candidate = Path::new(trimmed);
    let mut clean = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(clean)
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "application/javascript",
        Some("json" | "map") => "application/json",
        Some("wasm") => "application/wasm",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        Some("woff2") => "font/woff2",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

fn is_compressible(content_type: &str) -> bool {
    content_type.starts_with("text/")
        || content_type.starts_with("application/javascript")
        || content_type.starts_with("application/json")
        || content_type.starts_with("application/wasm")
        || content_type.starts_with("image/svg")
}

fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).expect("writing to vec");
    encoder.finish().expect("finishing gzip stream")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn start_server(root: &Path, compress: bool) -> (SocketAddr, watch::Sender<bool>) {
        let (reload, _) = broadcast::channel(8);
        let server = DevServer::bind(0, root, true, compress, reload)
            .await
            .unwrap();
        let addr = server.local_addr();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(server.serve(shutdown_rx));
        (addr, shutdown_tx)
    }

    async fn get(addr: SocketAddr, path: &str, extra: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: localhost\r\n{}Connection: close\r\n\r\n",
            path, extra
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    #[tokio::test]
    async fn test_port_in_use_is_reported() {
        let occupier = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = occupier.local_addr().unwrap().port();

        let (reload, _) = broadcast::channel(8);
        let result = DevServer::bind(port, "/tmp", true, false, reload).await;
        assert!(matches!(result, Err(ServerError::PortInUse { port: p }) if p == port));
    }

    #[tokio::test]
    async fn test_serves_files_with_content_type() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("index.html"), "<html>hi</html>").unwrap();
        let (addr, _shutdown) = start_server(temp.path(), false).await;

        let response = get(addr, "/index.html", "").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("text/html"));
        assert!(response.ends_with("<html>hi</html>"));
    }

    #[tokio::test]
    async fn test_root_serves_index() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("index.html"), "<html>root</html>").unwrap();
        let (addr, _shutdown) = start_server(temp.path(), false).await;

        let response = get(addr, "/", "").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("root"));
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let temp = TempDir::new().unwrap();
        let (addr, _shutdown) = start_server(temp.path(), false).await;

        let response = get(addr, "/missing.js", "").await;
        assert!(response.starts_with("HTTP/1.1 404"));
    }

    #[tokio::test]
    async fn test_compression_when_enabled_and_accepted() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("app.js"), "console.log('x')".repeat(50)).unwrap();
        let (addr, _shutdown) = start_server(temp.path(), true).await;

        let response = get(addr, "/app.js", "Accept-Encoding: gzip\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.to_lowercase().contains("content-encoding: gzip"));

        // without the accept header the payload stays identity-encoded
        let plain = get(addr, "/app.js", "").await;
        assert!(!plain.to_lowercase().contains("content-encoding"));
    }

    #[test]
    fn test_sanitize_rejects_traversal() {
        assert_eq!(sanitize("/app.js"), Some(PathBuf::from("app.js")));
        assert_eq!(sanitize("/img/logo.png"), Some(PathBuf::from("img/logo.png")));
        assert_eq!(sanitize("/../etc/passwd"), None);
        assert_eq!(sanitize("/img/../../secret"), None);
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for(Path::new("a.wasm")), "application/wasm");
        assert_eq!(content_type_for(Path::new("a.css")), "text/css; charset=utf-8");
        assert_eq!(content_type_for(Path::new("a.bin")), "application/octet-stream");
    }

    #[test]
    fn test_gzip_round_trip() {
        let compressed = gzip(b"hello hello hello hello");
        let mut decoder = flate2::read::GzDecoder::new(&compressed[..]);
        let mut out = String::new();
        std::io::Read::read_to_string(&mut decoder, &mut out).unwrap();
        assert_eq!(out, "hello hello hello hello");
    }
}
