//! Daemon side of the broker socket

use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

use super::messages::{BrokerRequest, BrokerResponse};

/// Bind the broker socket at `socket_path`
///
/// A socket file left behind by a daemon that died is replaced.
pub fn create_listener_at(socket_path: &Path) -> Result<(UnixListener, PathBuf)> {
    debug!(?socket_path, "create_listener_at: called");

    if let Some(dir) = socket_path.parent() {
        fs::create_dir_all(dir).context(format!("Failed to create {}", dir.display()))?;
    }
    if socket_path.exists() {
        warn!(?socket_path, "replacing leftover broker socket");
        fs::remove_file(socket_path).context("Failed to remove leftover broker socket")?;
    }

    let listener =
        UnixListener::bind(socket_path).context(format!("Failed to bind broker socket {}", socket_path.display()))?;
    Ok((listener, socket_path.to_path_buf()))
}

/// Best-effort removal of the socket file
pub fn cleanup_socket(socket_path: &Path) {
    if !socket_path.exists() {
        return;
    }
    match fs::remove_file(socket_path) {
        Ok(()) => debug!(?socket_path, "cleanup_socket: removed"),
        Err(e) => warn!(?socket_path, error = %e, "could not remove broker socket"),
    }
}

/// Read one request line, rejecting anything over `max_size` bytes
pub async fn read_request(stream: &mut UnixStream, max_size: usize) -> Result<BrokerRequest> {
    let limit = u64::try_from(max_size).unwrap_or(u64::MAX).saturating_add(1);
    let mut reader = BufReader::new(stream.take(limit));
    let mut line = String::new();

    let n = reader.read_line(&mut line).await.context("Failed to read request")?;
    if n > max_size {
        bail!("Message too large: more than {} bytes", max_size);
    }
    if line.trim().is_empty() {
        bail!("Empty request");
    }

    let request: BrokerRequest = serde_json::from_str(line.trim()).context("Failed to parse request")?;
    debug!(?request, "read_request: parsed");
    Ok(request)
}

/// Write one response line
pub async fn send_response(stream: &mut UnixStream, response: &BrokerResponse) -> Result<()> {
    let mut line = serde_json::to_vec(response).context("Failed to serialize response")?;
    line.push(b'\n');
    stream.write_all(&line).await.context("Failed to send response")?;
    stream.flush().await.context("Failed to flush response")?;
    debug!(?response, "send_response: sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn socket_in(temp: &TempDir) -> PathBuf {
        temp.path().join("broker.sock")
    }

    #[tokio::test]
    async fn test_listener_creates_missing_dirs() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("run").join("ctxbroker").join("broker.sock");

        let (_listener, bound) = create_listener_at(&socket_path).unwrap();
        assert_eq!(bound, socket_path);
        assert!(bound.exists());
    }

    #[tokio::test]
    async fn test_listener_replaces_leftover_file() {
        let temp = TempDir::new().unwrap();
        let socket_path = socket_in(&temp);
        fs::write(&socket_path, "leftover").unwrap();

        assert!(create_listener_at(&socket_path).is_ok());
    }

    #[test]
    fn test_cleanup_socket_is_best_effort() {
        let temp = TempDir::new().unwrap();
        let socket_path = socket_in(&temp);
        fs::write(&socket_path, "").unwrap();

        cleanup_socket(&socket_path);
        assert!(!socket_path.exists());
        cleanup_socket(&socket_path);
    }

    #[tokio::test]
    async fn test_read_request_rejects_oversized() {
        let temp = TempDir::new().unwrap();
        let socket_path = socket_in(&temp);
        let (listener, _) = create_listener_at(&socket_path).unwrap();

        let writer = tokio::spawn(async move {
            let mut stream = UnixStream::connect(&socket_path).await.unwrap();
            let big = format!(
                "{{\"type\":\"InjectData\",\"run_id\":\"r\",\"name\":\"n\",\"value\":\"{}\"}}\n",
                "x".repeat(256)
            );
            // The reader may hang up before everything is written
            let _ = stream.write_all(big.as_bytes()).await;
        });

        let (mut stream, _) = listener.accept().await.unwrap();
        let err = read_request(&mut stream, 64).await.unwrap_err();
        assert!(err.to_string().contains("too large"));
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_and_response_lines() {
        let temp = TempDir::new().unwrap();
        let socket_path = socket_in(&temp);
        let (listener, _) = create_listener_at(&socket_path).unwrap();

        let client = tokio::spawn(async move {
            let mut stream = UnixStream::connect(&socket_path).await.unwrap();
            stream.write_all(b"{\"type\":\"Ping\"}\n").await.unwrap();
            let mut reply = String::new();
            BufReader::new(stream).read_line(&mut reply).await.unwrap();
            reply
        });

        let (mut stream, _) = listener.accept().await.unwrap();
        assert_eq!(read_request(&mut stream, 1024).await.unwrap(), BrokerRequest::Ping);
        send_response(&mut stream, &BrokerResponse::NotReady).await.unwrap();

        assert_eq!(client.await.unwrap(), "{\"type\":\"NotReady\"}\n");
    }
}
