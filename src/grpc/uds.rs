//! Unix domain socket transport for tonic
//!
//! The kubelet and the runtime only talk gRPC over unix sockets. Servers
//! take a bound [`UnixListener`] wrapped in a stream; clients need a custom
//! connector because tonic insists on a URI even when the actual connection
//! is a socket file.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hyper_util::rt::TokioIo;
use tokio::net::{UnixListener, UnixStream};
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;

/// Bind a listener at `path`, replacing any stale socket file
///
/// Parent directories are created as needed.
pub fn bind_unix_listener(path: &Path) -> io::Result<UnixListener> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    UnixListener::bind(path)
}

/// Open a gRPC channel to a server listening on a unix socket
pub async fn connect_unix(path: impl Into<PathBuf>) -> Result<Channel, tonic::transport::Error> {
    let path = path.into();

    // Placeholder authority; the connector below ignores it
    Endpoint::try_from("http://[::1]:50051")?
        .connect_with_connector(service_fn(move |_: Uri| {
            let p = path.clone();
            async move {
                let stream = UnixStream::connect(p).await?;
                Ok::<_, io::Error>(TokioIo::new(stream))
            }
        }))
        .await
}

/// Wait until something accepts connections on `path`
pub async fn wait_for_socket(path: &Path, timeout: Duration) -> io::Result<()> {
    let poll_interval = Duration::from_millis(50);
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match UnixStream::connect(path).await {
            Ok(_) => return Ok(()),
            Err(e) if tokio::time::Instant::now() >= deadline => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("socket {} not ready after {:?}: {}", path.display(), timeout, e),
                ));
            }
            Err(_) => tokio::time::sleep(poll_interval).await,
        }
    }
}
