//! Unix socket server for local message dispatch.
//!
//! Accepts incoming connections on a Unix domain socket, spawns one task per
//! connection and answers each read with a single newline-terminated line.

use crate::protocol::Dispatcher;
use bytes::BytesMut;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixListener;
use tracing::{debug, error, info, trace, warn};

/// Server instance
pub struct Server {
    path: PathBuf,
    listener: UnixListener,
    dispatcher: Arc<Dispatcher>,
    buffer_size: usize,
}

impl Server {
    /// Remove any stale entry at `path` and bind a new listener there.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(path: &Path, dispatcher: Dispatcher, buffer_size: usize) -> io::Result<Self> {
        remove_stale_socket(path);

        let listener = UnixListener::bind(path)?;
        info!(path = %path.display(), "Server listening");

        Ok(Server {
            path: path.to_path_buf(),
            listener,
            dispatcher: Arc::new(dispatcher),
            buffer_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// In-flight connections are not drained; the listening socket is closed
    /// when this returns.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(path = %self.path.display(), "Server shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        debug!("New connection");

                        let dispatcher = Arc::clone(&self.dispatcher);
                        let buffer_size = self.buffer_size;

                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, dispatcher, buffer_size).await {
                                warn!(error = %e, "Connection read error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                },
            }
        }
    }
}

/// Best-effort removal of a leftover socket file
fn remove_stale_socket(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed stale socket file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove stale socket file"),
    }
}

/// Handle a single client connection.
///
/// Every read is one payload; partial client messages are not reassembled.
/// Returns `Ok` on clean end-of-stream and the error on any other read
/// failure. Write failures are logged and do not end the loop.
async fn handle_connection<S>(
    mut stream: S,
    dispatcher: Arc<Dispatcher>,
    buffer_size: usize,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = BytesMut::with_capacity(buffer_size);

    loop {
        buffer.clear();

        let n = stream.read_buf(&mut buffer).await?;
        if n == 0 {
            trace!("Connection closed by client");
            return Ok(());
        }

        let response = dispatcher.dispatch(&buffer[..n]);
        trace!(%response, "Sending response");

        let mut line = BytesMut::with_capacity(response.len() + 1);
        line.extend_from_slice(response.as_bytes());
        line.extend_from_slice(b"\n");

        if let Err(e) = stream.write_all(&line).await {
            debug!(error = %e, "Failed to write response");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::UnixStream;
    use tokio::sync::oneshot;

    const BUFFER_SIZE: usize = 4096;

    fn dispatcher() -> Arc<Dispatcher> {
        Arc::new(test_dispatcher())
    }

    fn test_dispatcher() -> Dispatcher {
        Dispatcher::new(vec![
            "/Users/player/projects/sync".to_string(),
            "/Users/player/projects/test".to_string(),
            "/Users/player/projects/navicate".to_string(),
        ])
    }

    /// Bind a server in a fresh temp dir and run it on a background task.
    fn spawn_server(dir: &tempfile::TempDir) -> (PathBuf, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
        let path = dir.path().join("test.sock");
        let server = Server::bind(&path, test_dispatcher(), BUFFER_SIZE).unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run(async {
            let _ = rx.await;
        }));
        (path, tx, handle)
    }

    async fn request(stream: &mut BufReader<UnixStream>, payload: &[u8]) -> String {
        stream.get_mut().write_all(payload).await.unwrap();
        let mut line = String::new();
        stream.read_line(&mut line).await.unwrap();
        line
    }

    #[tokio::test]
    async fn test_handle_ping() {
        let mock = tokio_test::io::Builder::new()
            .read(b"ping")
            .write(b"pong\n")
            .build();

        handle_connection(mock, dispatcher(), BUFFER_SIZE).await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_sequential_payloads() {
        let mock = tokio_test::io::Builder::new()
            .read(b"pingpong")
            .write(b"pong\n")
            .read(br#"["ab","abc"]"#)
            .write(b"{\"ab\":0,\"abc\":1}\n")
            .read(b"not json")
            .write(b"{}\n")
            .build();

        handle_connection(mock, dispatcher(), BUFFER_SIZE).await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_read_error() {
        let mock = tokio_test::io::Builder::new()
            .read(b"ping")
            .write(b"pong\n")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();

        let result = handle_connection(mock, dispatcher(), BUFFER_SIZE).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_handle_write_error_keeps_reading() {
        let mock = tokio_test::io::Builder::new()
            .read(b"ping")
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "broken"))
            .read(b"ping")
            .write(b"pong\n")
            .build();

        handle_connection(mock, dispatcher(), BUFFER_SIZE).await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_clean_eof() {
        let (client, server) = UnixStream::pair().unwrap();
        drop(client);

        handle_connection(server, dispatcher(), BUFFER_SIZE).await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_releases_connection() {
        let (mut client, server) = UnixStream::pair().unwrap();
        let task = tokio::spawn(handle_connection(server, dispatcher(), BUFFER_SIZE));

        client.write_all(b"ping").await.unwrap();
        client.shutdown().await.unwrap();

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"pong\n");

        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_server_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let (path, shutdown, handle) = spawn_server(&dir);

        let mut stream = BufReader::new(UnixStream::connect(&path).await.unwrap());
        assert_eq!(request(&mut stream, b"ping").await, "pong\n");
        assert_eq!(
            request(&mut stream, b"paths").await,
            "[\"/Users/player/projects/sync\",\"/Users/player/projects/test\",\"/Users/player/projects/navicate\"]\n"
        );
        assert_eq!(
            request(&mut stream, br#"["ab","abc"]"#).await,
            "{\"ab\":0,\"abc\":1}\n"
        );
        assert_eq!(request(&mut stream, b"not json").await, "{}\n");

        shutdown.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_server_removes_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sock");
        std::fs::write(&path, b"stale").unwrap();

        let server = Server::bind(&path, test_dispatcher(), BUFFER_SIZE).unwrap();
        assert_eq!(server.path(), path.as_path());

        drop(server);
        // Rebinding over the socket file left by the previous listener works too
        let server = Server::bind(&path, test_dispatcher(), BUFFER_SIZE).unwrap();
        drop(server);
    }

    #[tokio::test]
    async fn test_server_bind_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("test.sock");

        assert!(Server::bind(&path, test_dispatcher(), BUFFER_SIZE).is_err());
    }

    #[tokio::test]
    async fn test_server_concurrent_connections() {
        let dir = tempfile::tempdir().unwrap();
        let (path, shutdown, handle) = spawn_server(&dir);

        let mut clients = Vec::new();
        for _ in 0..50 {
            let path = path.clone();
            clients.push(tokio::spawn(async move {
                let mut stream = BufReader::new(UnixStream::connect(&path).await.unwrap());
                request(&mut stream, br#"["a","bb"]"#).await
            }));
        }

        for client in clients {
            assert_eq!(client.await.unwrap(), "{\"a\":1,\"bb\":0}\n");
        }

        shutdown.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_server_keeps_serving_after_client_disconnects() {
        let dir = tempfile::tempdir().unwrap();
        let (path, shutdown, handle) = spawn_server(&dir);

        let first = UnixStream::connect(&path).await.unwrap();
        drop(first);

        let mut second = BufReader::new(UnixStream::connect(&path).await.unwrap());
        assert_eq!(request(&mut second, b"ping").await, "pong\n");

        shutdown.send(()).unwrap();
        handle.await.unwrap();
    }
}
