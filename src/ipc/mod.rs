//! Control socket via Unix domain sockets
//!
//! Control subcommands and listener collaborators talk to the running daemon
//! with length-prefixed JSON over a Unix domain socket.

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

mod handler;
mod messages;
pub use handler::{ControlHandler, spawn_control_listener};
pub use messages::{EngineRequest, EngineResponse};

use crate::constants::ipc::{MAX_MESSAGE_SIZE, SOCKET_RELATIVE_PATH};

/// Get default socket path (XDG_RUNTIME_DIR with fallback to cache)
pub fn default_socket_path() -> Result<PathBuf> {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return Ok(PathBuf::from(runtime_dir).join(SOCKET_RELATIVE_PATH));
    }

    let cache = dirs::cache_dir().context("Failed to determine cache directory (no XDG_RUNTIME_DIR or HOME)")?;
    Ok(cache.join(SOCKET_RELATIVE_PATH))
}

/// Client connection to the engine
pub struct ControlClient {
    pub(crate) stream: UnixStream,
}

impl ControlClient {
    pub fn connect_to(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path)
            .with_context(|| format!("Failed to connect to engine at {}", path.display()))?;
        Ok(Self { stream })
    }

    pub fn send_request(&mut self, req: &EngineRequest) -> Result<()> {
        write_message(&mut self.stream, req)
    }

    /// Receive response from the engine (blocking)
    pub fn recv_response(&mut self) -> Result<EngineResponse> {
        read_message(&mut self.stream)
    }

    /// Send request and wait for response
    pub fn request(&mut self, req: EngineRequest) -> Result<EngineResponse> {
        self.send_request(&req)?;
        self.recv_response()
    }
}

/// Listening side owned by the daemon
pub struct ControlServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl ControlServer {
    pub fn bind_to(socket_path: PathBuf) -> Result<Self> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create socket directory: {}", parent.display()))?;
        }

        // Stale socket from a crashed daemon
        if socket_path.exists() {
            std::fs::remove_file(&socket_path)
                .with_context(|| format!("Failed to remove stale socket: {}", socket_path.display()))?;
        }

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind socket at {}", socket_path.display()))?;

        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o700))
                .context("Failed to set socket permissions")?;
        }

        // Polled so the listener thread can observe shutdown
        listener
            .set_nonblocking(true)
            .context("Failed to make control socket non-blocking")?;

        Ok(Self { listener, socket_path })
    }

    /// Accept a pending connection, `None` if nobody is waiting
    pub fn try_accept(&self) -> Result<Option<UnixStream>> {
        match self.listener.accept() {
            Ok((stream, _addr)) => {
                stream
                    .set_nonblocking(false)
                    .context("Failed to make client stream blocking")?;
                Ok(Some(stream))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e).context("Failed to accept control connection"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

const LEN_PREFIX: usize = std::mem::size_of::<u32>();

/// Frame `msg` as a little-endian `u32` byte count followed by its JSON
pub(crate) fn write_message<T: Serialize>(writer: &mut impl Write, msg: &T) -> Result<()> {
    let body = serde_json::to_vec(msg).context("Failed to encode control message")?;
    let len = u32::try_from(body.len())
        .ok()
        .filter(|len| *len as usize <= MAX_MESSAGE_SIZE)
        .ok_or_else(|| anyhow!("Message too large: {} bytes (max: {MAX_MESSAGE_SIZE})", body.len()))?;

    let mut framed = Vec::with_capacity(LEN_PREFIX + body.len());
    framed.extend_from_slice(&len.to_le_bytes());
    framed.extend_from_slice(&body);
    writer.write_all(&framed).context("Failed to send control message")?;
    writer.flush().context("Failed to flush control stream")
}

/// Read one frame written by [`write_message`]
pub(crate) fn read_message<T: DeserializeOwned>(reader: &mut impl Read) -> Result<T> {
    let mut prefix = [0u8; LEN_PREFIX];
    reader
        .read_exact(&mut prefix)
        .context("Failed to read frame header")?;
    let len = u32::from_le_bytes(prefix) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(anyhow!("Message too large: {len} bytes (max: {MAX_MESSAGE_SIZE})"));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).context("Failed to read frame body")?;
    serde_json::from_slice(&body).context("Failed to decode control message")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    use crate::state::GameStatePayload;

    #[test]
    fn test_messages_cross_a_socket_pair() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        let request = EngineRequest::GameState {
            origin: "730".to_string(),
            payload: GameStatePayload::legacy(json!({ "player": { "health": 12 } })),
        };
        write_message(&mut a, &request).unwrap();
        let received: EngineRequest = read_message(&mut b).unwrap();
        assert_eq!(received, request);
    }

    #[test]
    fn test_oversized_length_prefix_is_rejected() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        a.write_all(&((MAX_MESSAGE_SIZE as u32) + 1).to_le_bytes()).unwrap();
        let err = read_message::<EngineResponse>(&mut b).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_bind_replaces_stale_socket_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run/control.sock");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"stale").unwrap();

        let server = ControlServer::bind_to(path.clone()).unwrap();
        assert!(server.try_accept().unwrap().is_none());

        let _client = ControlClient::connect_to(&path).unwrap();
        assert!(server.try_accept().unwrap().is_some());

        drop(server);
        assert!(!path.exists());
    }
}
