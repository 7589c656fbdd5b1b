//! Control socket listener thread

use anyhow::{Context, Result};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ControlServer, EngineRequest, EngineResponse, read_message, write_message};
use crate::constants::ipc::{ACCEPT_POLL_MS, CLIENT_READ_TIMEOUT_MS};
use crate::context::EngineContext;
use crate::profile::ProfileId;
use crate::router::GameStateRouter;

/// Applies control requests to the engine
#[derive(Clone)]
pub struct ControlHandler {
    ctx: Arc<EngineContext>,
    router: GameStateRouter,
    cancel: CancellationToken,
}

impl ControlHandler {
    pub fn new(ctx: Arc<EngineContext>, cancel: CancellationToken) -> Self {
        let router = GameStateRouter::new(ctx.clone());
        Self { ctx, router, cancel }
    }

    pub fn handle(&self, request: EngineRequest) -> EngineResponse {
        match request {
            EngineRequest::GameState { origin, payload } => match self.router.route(&origin, payload) {
                Ok(_) => EngineResponse::Ok,
                Err(e) => EngineResponse::Error(e.to_string()),
            },

            EngineRequest::SetPreview(None) => {
                self.ctx.set_preview(None);
                EngineResponse::Ok
            }

            EngineRequest::SetPreview(Some(key)) => {
                let registry = self.ctx.registry();
                let known = registry.get(&ProfileId::new(key.as_str())).is_some()
                    || registry.resolve_by_process(&key).is_some();
                if !known {
                    return EngineResponse::Error(format!("no profile for '{key}'"));
                }
                self.ctx.set_preview(Some(key));
                EngineResponse::Ok
            }

            EngineRequest::ResetGameState(process) => match self.router.reset(&process) {
                Ok(_) => EngineResponse::Ok,
                Err(e) => EngineResponse::Error(e.to_string()),
            },

            EngineRequest::WrapperConnected(process) => {
                // A disconnecting wrapper leaves no stale state behind
                if process.is_none()
                    && let Some(previous) = self.ctx.wrapper()
                    && let Err(e) = self.router.reset(&previous)
                {
                    debug!(wrapper = %previous, error = %e, "No state to reset for wrapper");
                }
                self.ctx.set_wrapper(process);
                EngineResponse::Ok
            }

            EngineRequest::Ping => EngineResponse::Pong,

            EngineRequest::Shutdown => {
                info!("Received shutdown request via control socket");
                self.cancel.cancel();
                EngineResponse::Ok
            }
        }
    }
}

/// Spawn the listener thread; it exits once `cancel` fires
pub fn spawn_control_listener(
    server: ControlServer,
    handler: ControlHandler,
) -> Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("lightstack-control".to_string())
        .spawn(move || {
            if let Err(e) = run_control_loop(&server, &handler) {
                error!(error = ?e, "Control listener thread crashed");
                handler.cancel.cancel();
            }
        })
        .context("Failed to spawn control listener thread")
}

fn run_control_loop(server: &ControlServer, handler: &ControlHandler) -> Result<()> {
    info!(socket = ?server.path(), "Control listener started");

    while !handler.cancel.is_cancelled() {
        let Some(stream) = server.try_accept()? else {
            std::thread::sleep(Duration::from_millis(ACCEPT_POLL_MS));
            continue;
        };
        debug!("Control client connected");
        if let Err(e) = serve_client(stream, handler) {
            warn!(error = ?e, "Control connection failed");
        }
    }

    info!("Control listener stopped");
    Ok(())
}

fn serve_client(mut stream: UnixStream, handler: &ControlHandler) -> Result<()> {
    stream
        .set_read_timeout(Some(Duration::from_millis(CLIENT_READ_TIMEOUT_MS)))
        .context("Failed to set client read timeout")?;

    loop {
        let request: EngineRequest = match read_message(&mut stream) {
            Ok(request) => request,
            Err(e) => {
                debug!(error = %e, "Control client disconnected");
                return Ok(());
            }
        };
        let shutdown = request == EngineRequest::Shutdown;
        let response = handler.handle(request);
        write_message(&mut stream, &response)?;
        if shutdown {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineSettings;
    use crate::ipc::ControlClient;
    use crate::registry::ProfileRegistry;
    use crate::state::GameStatePayload;
    use serde_json::json;
    use tempfile::TempDir;

    fn handler() -> ControlHandler {
        let ctx = EngineContext::new(EngineSettings::default(), ProfileRegistry::with_builtins(None).unwrap());
        ControlHandler::new(Arc::new(ctx), CancellationToken::new())
    }

    #[test]
    fn test_preview_must_name_a_known_profile() {
        let handler = handler();
        assert_eq!(handler.handle(EngineRequest::SetPreview(Some("cs2".to_string()))), EngineResponse::Ok);
        assert_eq!(handler.ctx.preview().as_deref().map(String::as_str), Some("cs2"));

        let response = handler.handle(EngineRequest::SetPreview(Some("nothing".to_string())));
        assert!(matches!(response, EngineResponse::Error(_)));
        assert_eq!(handler.ctx.preview().as_deref().map(String::as_str), Some("cs2"));

        assert_eq!(handler.handle(EngineRequest::SetPreview(None)), EngineResponse::Ok);
        assert!(handler.ctx.preview().is_none());
    }

    #[test]
    fn test_wrapper_disconnect_resets_state() {
        let handler = handler();
        handler.handle(EngineRequest::WrapperConnected(Some("dota2.exe".to_string())));
        let response = handler.handle(EngineRequest::GameState {
            origin: "dota2.exe".to_string(),
            payload: GameStatePayload::legacy(json!({ "Hero": { "Dead": true } })),
        });
        assert_eq!(response, EngineResponse::Ok);

        let dota = handler.ctx.registry().get(&ProfileId::new("dota2")).unwrap();
        assert_eq!(dota.game_state().boolean("Hero/Dead"), Some(true));

        handler.handle(EngineRequest::WrapperConnected(None));
        assert!(handler.ctx.wrapper().is_none());
        assert_eq!(dota.game_state().boolean("Hero/Dead"), Some(false));
    }

    #[test]
    fn test_unroutable_state_is_reported() {
        let handler = handler();
        let response = handler.handle(EngineRequest::GameState {
            origin: "notepad.exe".to_string(),
            payload: GameStatePayload::legacy(json!({})),
        });
        assert!(matches!(response, EngineResponse::Error(_)));
    }

    #[test]
    fn test_listener_serves_requests_until_shutdown() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("control.sock");
        let server = ControlServer::bind_to(path.clone()).unwrap();
        let handler = handler();
        let cancel = handler.cancel.clone();
        let thread = spawn_control_listener(server, handler).unwrap();

        let mut client = ControlClient::connect_to(&path).unwrap();
        assert_eq!(client.request(EngineRequest::Ping).unwrap(), EngineResponse::Pong);
        assert_eq!(client.request(EngineRequest::Shutdown).unwrap(), EngineResponse::Ok);

        thread.join().unwrap();
        assert!(cancel.is_cancelled());
        assert!(!path.exists());
    }
}
