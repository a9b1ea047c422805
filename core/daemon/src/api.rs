//! Socket API: newline-delimited JSON requests over a Unix socket.

use std::io::Write;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use tapto_core::{LaunchQueue, SharedState, StateSnapshot, TaptoConfig, Token};
use tapto_daemon_protocol::{
    parse_launch, parse_write_request, read_frame, ErrorInfo, Method, Request, Response,
    StateView, TokenInfo, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};

const READ_TIMEOUT_SECS: u64 = 2;

pub struct ApiContext {
    pub state: Arc<SharedState>,
    pub queue: LaunchQueue,
    pub config: Arc<TaptoConfig>,
    /// Bumped by the state update hook on every change.
    pub revision: Arc<AtomicU64>,
}

impl ApiContext {
    fn launcher_disabled(&self) -> bool {
        self.state.is_launcher_disabled() || self.config.tapto.disable_launcher
    }
}

pub fn serve(listener: UnixListener, context: Arc<ApiContext>) {
    for stream in listener.incoming() {
        if context.state.should_stop() {
            break;
        }
        match stream {
            Ok(stream) => {
                let context = Arc::clone(&context);
                thread::spawn(move || handle_connection(stream, &context));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn handle_connection(mut stream: UnixStream, context: &ApiContext) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let stop_after_reply =
        request.method == Method::Stop && request.protocol_version == PROTOCOL_VERSION;
    let response = handle_request(request, context);
    let _ = write_response(&mut stream, response);

    if stop_after_reply {
        info!("Stop requested over API");
        context.state.request_stop();
    }
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let frame = read_frame(stream, MAX_REQUEST_BYTES)
        .map_err(|err| ErrorInfo::new(err.code(), err.to_string()))?;
    if frame.iter().all(u8::is_ascii_whitespace) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(&frame).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

pub(crate) fn handle_request(request: Request, context: &ApiContext) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    match request.method {
        Method::GetHealth => {
            let (reader_connected, reader_type) = context.state.reader_status();
            Response::ok(
                request.id,
                serde_json::json!({
                    "status": "ok",
                    "pid": std::process::id(),
                    "version": env!("CARGO_PKG_VERSION"),
                    "protocol_version": PROTOCOL_VERSION,
                    "revision": context.revision.load(Ordering::SeqCst),
                    "reader_connected": reader_connected,
                    "reader_type": reader_type,
                }),
            )
        }
        Method::GetState => {
            let view = state_view(
                context.state.snapshot(),
                context.revision.load(Ordering::SeqCst),
            );
            match serde_json::to_value(view) {
                Ok(value) => Response::ok(request.id, value),
                Err(err) => Response::error(
                    request.id,
                    "serialization_error",
                    format!("Failed to serialize state: {}", err),
                ),
            }
        }
        Method::Launch => {
            let Some(params) = request.params else {
                return Response::error(request.id, "invalid_params", "text is required");
            };
            let parsed = match parse_launch(params) {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            if context.launcher_disabled() {
                return Response::error(
                    request.id,
                    "launcher_disabled",
                    "launching is currently disabled",
                );
            }

            let token = Token::from_api(parsed.uid.unwrap_or_default(), parsed.text);
            info!(uid = %token.uid, text = %token.text, "API launch accepted");
            context.state.set_active_card(token.clone());
            context.queue.enqueue(token);
            Response::ok(request.id, serde_json::json!({ "accepted": true }))
        }
        Method::DisableLauncher => {
            context.state.disable_launcher();
            Response::ok(
                request.id,
                serde_json::json!({ "launcher_disabled": true }),
            )
        }
        Method::EnableLauncher => {
            context.state.enable_launcher();
            Response::ok(
                request.id,
                serde_json::json!({ "launcher_disabled": context.launcher_disabled() }),
            )
        }
        Method::SetWriteRequest => {
            let Some(params) = request.params else {
                return Response::error(request.id, "invalid_params", "text is required");
            };
            let parsed = match parse_write_request(params) {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            context.state.set_write_request(&parsed.text);
            Response::ok(
                request.id,
                serde_json::json!({ "write_request": parsed.text }),
            )
        }
        Method::Stop => Response::ok(request.id, serde_json::json!({ "stopping": true })),
    }
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}

fn token_info(token: &Token) -> TokenInfo {
    TokenInfo {
        kind: token.kind.to_string(),
        uid: token.uid.clone(),
        text: token.text.clone(),
        scan_time: token.scan_time,
        from_api: token.from_api,
    }
}

fn state_view(snapshot: StateSnapshot, revision: u64) -> StateView {
    StateView {
        revision,
        active_card: token_info(&snapshot.active_card),
        last_scanned: token_info(&snapshot.last_scanned),
        reader_connected: snapshot.reader_connected,
        reader_type: snapshot.reader_type,
        launcher_disabled: snapshot.launcher_disabled,
        stop_requested: snapshot.stop_requested,
        write_request: snapshot.write_request,
        db_load_time: snapshot.db_load_time,
        uid_mappings: snapshot.uid_mappings,
        text_mappings: snapshot.text_mappings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::Receiver;
    use serde_json::Value;

    struct Harness {
        _dir: tempfile::TempDir,
        context: ApiContext,
        launches: Receiver<Token>,
    }

    fn harness(config: TaptoConfig) -> Harness {
        let dir = tempfile::tempdir().expect("temp dir");
        let state = Arc::new(SharedState::new(dir.path().join("disable_launch")));
        let (queue, launches) = LaunchQueue::new();
        Harness {
            _dir: dir,
            context: ApiContext {
                state,
                queue,
                config: Arc::new(config),
                revision: Arc::new(AtomicU64::new(0)),
            },
            launches,
        }
    }

    fn call(h: &Harness, method: Method, params: Option<Value>) -> Response {
        handle_request(Request::new(method, params), &h.context)
    }

    #[test]
    fn launch_sets_active_card_and_enqueues() {
        let h = harness(TaptoConfig::default());
        let response = call(
            &h,
            Method::Launch,
            Some(serde_json::json!({"text": "snes/mario.sfc", "uid": "04aa"})),
        );
        assert!(response.ok);

        let queued = h.launches.try_recv().expect("queued token");
        assert_eq!(queued.text, "snes/mario.sfc");
        assert!(queued.from_api);
        assert_eq!(h.context.state.active_card(), queued);
        assert_eq!(h.context.state.last_scanned().uid, "04aa");
    }

    #[test]
    fn launch_is_rejected_while_disabled() {
        let h = harness(TaptoConfig::default());
        assert!(call(&h, Method::DisableLauncher, None).ok);

        let response = call(
            &h,
            Method::Launch,
            Some(serde_json::json!({"text": "snes/mario.sfc"})),
        );
        assert!(!response.ok);
        assert_eq!(response.error.expect("error").code, "launcher_disabled");
        assert!(h.launches.try_recv().is_err());

        assert!(call(&h, Method::EnableLauncher, None).ok);
        assert!(call(
            &h,
            Method::Launch,
            Some(serde_json::json!({"text": "snes/mario.sfc"}))
        )
        .ok);
    }

    #[test]
    fn config_disable_overrides_enable() {
        let mut config = TaptoConfig::default();
        config.tapto.disable_launcher = true;
        let h = harness(config);

        let response = call(&h, Method::EnableLauncher, None);
        let data = response.data.expect("data");
        assert_eq!(data["launcher_disabled"], true);
    }

    #[test]
    fn launch_requires_params() {
        let h = harness(TaptoConfig::default());
        let response = call(&h, Method::Launch, None);
        assert_eq!(response.error.expect("error").code, "invalid_params");
    }

    #[test]
    fn get_state_reports_write_request_and_revision() {
        let h = harness(TaptoConfig::default());
        h.context.revision.store(7, Ordering::SeqCst);
        assert!(call(
            &h,
            Method::SetWriteRequest,
            Some(serde_json::json!({"text": "snes/zelda.sfc"}))
        )
        .ok);

        let response = call(&h, Method::GetState, None);
        let view: StateView =
            serde_json::from_value(response.data.expect("data")).expect("state view");
        assert_eq!(view.revision, 7);
        assert_eq!(view.write_request, "snes/zelda.sfc");
        assert!(!view.reader_connected);
        assert!(view.active_card.uid.is_empty());
        assert_eq!(view.active_card.kind, "Unknown");
    }

    #[test]
    fn rejects_protocol_mismatch() {
        let h = harness(TaptoConfig::default());
        let mut request = Request::new(Method::GetHealth, None);
        request.protocol_version = PROTOCOL_VERSION + 1;
        let response = handle_request(request, &h.context);
        assert_eq!(response.error.expect("error").code, "protocol_mismatch");
    }
}
