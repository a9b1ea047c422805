//! Launch worker: drains the launch queue and executes each accepted token.

use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

use tapto_core::{resolve_launch_text, Platform, SharedState, Token};

pub fn spawn_worker(
    queue: Receiver<Token>,
    state: Arc<SharedState>,
    platform: Arc<dyn Platform>,
    loaded: Sender<Token>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("tapto-launcher".to_string())
        .spawn(move || {
            for token in queue.iter() {
                launch_one(token, &state, platform.as_ref(), &loaded);
            }
            info!("Launch queue closed");
        })
}

/// Resolves mappings, launches, and reports the token back to the session
/// loop as loaded software. Returns whether the launch succeeded.
fn launch_one(
    token: Token,
    state: &SharedState,
    platform: &dyn Platform,
    loaded: &Sender<Token>,
) -> bool {
    let (uid_map, text_map) = state.database();
    let text = resolve_launch_text(&token, &uid_map, &text_map);
    if text.trim().is_empty() {
        warn!(token = %token, "Token has nothing to launch");
        return false;
    }

    if let Err(err) = platform.launch(&token, &text) {
        warn!(error = %err, token = %token, "Launch failed");
        return false;
    }

    if loaded.send(token).is_err() {
        warn!("Session loop is gone; loaded software not recorded");
    }
    true
}
