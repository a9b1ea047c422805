//! Client side of the socket API, used by the CLI subcommands.
//!
//! Each helper prints the daemon's reply and returns a process exit code.

use std::io::Write;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use serde_json::Value;
use tapto_daemon_protocol::{
    read_frame, FrameError, Method, Request, Response, StateView, MAX_REQUEST_BYTES,
};

const READ_TIMEOUT_MS: u64 = 2000;
const WRITE_TIMEOUT_MS: u64 = 600;

pub fn launch(text: &str, uid: Option<&str>) -> i32 {
    let mut params = serde_json::json!({ "text": text });
    if let Some(uid) = uid {
        params["uid"] = Value::from(uid);
    }
    report(call(Method::Launch, Some(params)), |_| {
        println!("Launch queued: {}", text);
    })
}

pub fn status() -> i32 {
    report(call(Method::GetState, None), |data| {
        match serde_json::from_value::<StateView>(data) {
            Ok(view) => print_state(&view),
            Err(err) => eprintln!("Unexpected state payload: {}", err),
        }
    })
}

pub fn stop() -> i32 {
    report(call(Method::Stop, None), |_| println!("Daemon stopping"))
}

pub fn set_launcher_enabled(enabled: bool) -> i32 {
    let method = if enabled {
        Method::EnableLauncher
    } else {
        Method::DisableLauncher
    };
    report(call(method, None), |data| {
        let disabled = data
            .get("launcher_disabled")
            .and_then(Value::as_bool)
            .unwrap_or(!enabled);
        println!("Launcher {}", if disabled { "disabled" } else { "enabled" });
    })
}

fn report(result: Result<Response, String>, on_ok: impl FnOnce(Value)) -> i32 {
    match result {
        Ok(response) if response.ok => {
            on_ok(response.data.unwrap_or(Value::Null));
            0
        }
        Ok(response) => {
            match response.error {
                Some(error) => eprintln!("Daemon error ({}): {}", error.code, error.message),
                None => eprintln!("Daemon returned an error without details"),
            }
            1
        }
        Err(err) => {
            eprintln!("{}", err);
            1
        }
    }
}

fn print_state(view: &StateView) {
    let reader = if view.reader_connected {
        format!("connected ({})", view.reader_type)
    } else {
        "disconnected".to_string()
    };
    println!("Reader:            {}", reader);
    println!(
        "Active card:       {}",
        describe(&view.active_card.uid, &view.active_card.text)
    );
    println!(
        "Last scanned:      {}",
        describe(&view.last_scanned.uid, &view.last_scanned.text)
    );
    println!("Launcher disabled: {}", view.launcher_disabled);
    if !view.write_request.is_empty() {
        println!("Pending write:     {}", view.write_request);
    }
    println!(
        "Mappings:          {} uid, {} text",
        view.uid_mappings, view.text_mappings
    );
}

fn describe(uid: &str, text: &str) -> String {
    if uid.is_empty() && text.is_empty() {
        "none".to_string()
    } else {
        format!("uid={} text={}", uid, text)
    }
}

fn call(method: Method, params: Option<Value>) -> Result<Response, String> {
    let socket = crate::daemon_socket_path()?;
    let mut stream = UnixStream::connect(&socket)
        .map_err(|err| format!("Failed to connect to daemon socket: {}", err))?;
    let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

    serde_json::to_writer(&mut stream, &Request::new(method, params))
        .map_err(|err| format!("Failed to write request: {}", err))?;
    stream
        .write_all(b"\n")
        .map_err(|err| format!("Failed to flush request: {}", err))?;
    stream.flush().ok();

    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Result<Response, String> {
    let frame = read_frame(stream, MAX_REQUEST_BYTES).map_err(|err| match err {
        FrameError::TimedOut => "Timed out waiting for daemon response".to_string(),
        other => other.to_string(),
    })?;
    serde_json::from_slice(&frame)
        .map_err(|err| format!("Failed to parse daemon response: {}", err))
}
