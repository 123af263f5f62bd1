//! Static file server: accept loop, per-connection task and routing

use super::config::ServeConfig;
use super::http::{
    content_type, read_request, write_response, HttpError, Method, Request, Response, StatusCode,
    WriteMode,
};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Where `/` redirects to
pub const INDEX_PATH: &str = "/index.html";
/// Pause after a failed `accept` (e.g. out of file descriptors)
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct Server {
    listener: TcpListener,
    config: Arc<ServeConfig>,
    limit: Arc<Semaphore>,
}

impl Server {
    /// Bind the listening socket; the backlog is `max_connections`
    pub async fn bind(config: ServeConfig) -> io::Result<Self> {
        let addr = SocketAddr::from((config.origin, config.port));
        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        if let Err(e) = socket.bind(addr) {
            if e.kind() == io::ErrorKind::PermissionDenied {
                error!(port = config.port, "Port is restricted; run as root or pick a port above 1023");
            }
            return Err(e);
        }
        let backlog = u32::try_from(config.max_connections).unwrap_or(u32::MAX);
        let listener = socket.listen(backlog)?;

        let local = listener.local_addr()?;
        info!(addr = %local, root = %config.directory.display(), "Server running");

        Ok(Self {
            listener,
            limit: Arc::new(Semaphore::new(config.max_connections)),
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `shutdown` resolves
    pub async fn run_until<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down");
                    return Ok(());
                }
                served = self.accept_one() => served?,
            }
        }
    }

    /// Wait for a free slot, accept one connection and hand it to a task
    async fn accept_one(&self) -> io::Result<()> {
        let permit = Arc::clone(&self.limit)
            .acquire_owned()
            .await
            .map_err(|_| io::Error::other("connection limit closed"))?;

        let Some((stream, peer)) = accept_or_backoff(self.listener.accept()).await else {
            return Ok(());
        };
        debug!(%peer, "Connection accepted");

        let config = Arc::clone(&self.config);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &config).await {
                debug!(%peer, error = %e, "Connection ended with error");
            }
            drop(permit);
        });
        Ok(())
    }
}

/// Failed accepts are logged and followed by `ACCEPT_BACKOFF` so the loop
/// does not spin on a persistent error
async fn accept_or_backoff<F, T>(accept: F) -> Option<T>
where
    F: Future<Output = io::Result<T>>,
{
    match accept.await {
        Ok(accepted) => Some(accepted),
        Err(e) => {
            warn!(error = %e, backoff_ms = ACCEPT_BACKOFF.as_millis() as u64, "Accept failed");
            tokio::time::sleep(ACCEPT_BACKOFF).await;
            None
        }
    }
}

async fn handle_connection(stream: TcpStream, config: &ServeConfig) -> Result<(), HttpError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let read = read_request(&mut reader);
    let request = if config.request_timeout_ms > 0 {
        match tokio::time::timeout(Duration::from_millis(config.request_timeout_ms), read).await {
            Ok(request) => request,
            Err(_) => {
                debug!(timeout_ms = config.request_timeout_ms, "Request timed out");
                return Ok(());
            }
        }
    } else {
        read.await
    };

    let request = match request {
        Ok(request) => request,
        Err(HttpError::Closed) => return Ok(()),
        Err(e @ (HttpError::BadRequestLine(_) | HttpError::BadHeader(_) | HttpError::HeadTooLarge)) => {
            debug!(error = %e, "Rejecting request");
            let response = Response::status_text(StatusCode::BAD_REQUEST);
            write_response(&mut write_half, &response, WriteMode::Full).await?;
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    if !request.is_supported_version() {
        debug!(major = request.major, minor = request.minor, "Unsupported version; closing");
        return Ok(());
    }

    let response = respond(&request, &config.directory).await;
    info!(
        method = ?request.method,
        uri = %request.uri,
        status = response.status.as_u16(),
        bytes = response.body.len(),
        "Request served"
    );
    write_response(&mut write_half, &response, WriteMode::for_request(&request)).await
}

/// Route one request against the virtual root
pub async fn respond(request: &Request, root: &Path) -> Response {
    if request.uri == "/" {
        return Response::redirect(INDEX_PATH);
    }
    if request.uri.contains("..") {
        return Response::status_text(StatusCode::BAD_REQUEST);
    }
    if request.method != Method::GET && request.method != Method::HEAD {
        return Response::status_text(StatusCode::NOT_IMPLEMENTED);
    }

    let path = resolve(root, &request.uri);
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_dir() => return Response::status_text(StatusCode::NOT_FOUND),
        Ok(_) => {}
        Err(e) => return io_error_response(&path, &e),
    }
    match tokio::fs::read(&path).await {
        Ok(body) => Response::new(StatusCode::OK, content_type(&path), body),
        Err(e) => io_error_response(&path, &e),
    }
}

/// Join the URI path (query and fragment stripped) onto the root
///
/// An absoluteURI (`http://host/path`) is served by its path.
fn resolve(root: &Path, uri: &str) -> PathBuf {
    let path = uri.split(['?', '#']).next().unwrap_or_default();
    let path = match path.split_once("://") {
        Some((_, rest)) => rest.find('/').map_or("", |i| &rest[i..]),
        None => path,
    };
    root.join(path.trim_start_matches('/'))
}

/// Missing files are 404; every other I/O failure is 500
fn io_error_response(path: &Path, e: &io::Error) -> Response {
    if e.kind() == io::ErrorKind::NotFound {
        return Response::status_text(StatusCode::NOT_FOUND);
    }
    error!(path = %path.display(), error = %e, "Failed to read file");
    Response::status_text(StatusCode::INTERNAL_SERVER_ERROR)
}
