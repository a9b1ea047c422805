//! Process-wide state shared by the session loop, reader drivers and the API.
//!
//! Every setter follows the same order: take the write lock, mutate, drop
//! the lock, then run the update hook. The hook receives `&SharedState` and
//! is free to call getters. Getters return clones.

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

use crate::reader::Reader;
use crate::token::Token;

pub type UpdateHook = Box<dyn Fn(&SharedState) + Send + Sync>;

#[derive(Default)]
struct StateInner {
    reader_connected: bool,
    reader_type: String,
    reader: Option<Arc<dyn Reader>>,
    active_card: Token,
    last_scanned: Token,
    stop_requested: bool,
    launcher_disabled: bool,
    write_request: String,
    db_load_time: Option<DateTime<Utc>>,
    uid_map: HashMap<String, String>,
    text_map: HashMap<String, String>,
}

/// Copy of the observable state, handed to API clients.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub active_card: Token,
    pub last_scanned: Token,
    pub reader_connected: bool,
    pub reader_type: String,
    pub stop_requested: bool,
    pub launcher_disabled: bool,
    pub write_request: String,
    pub db_load_time: Option<DateTime<Utc>>,
    pub uid_mappings: usize,
    pub text_mappings: usize,
}

pub struct SharedState {
    inner: RwLock<StateInner>,
    update_hook: OnceCell<UpdateHook>,
    disable_launch_file: PathBuf,
    stop_sender: Mutex<Option<Sender<()>>>,
    stop_receiver: Receiver<()>,
}

impl SharedState {
    /// Creates the state. The launcher starts disabled when the marker file
    /// from a previous run is still present.
    pub fn new(disable_launch_file: impl Into<PathBuf>) -> Self {
        let disable_launch_file = disable_launch_file.into();
        let (stop_sender, stop_receiver) = crossbeam_channel::bounded(0);
        let inner = StateInner {
            launcher_disabled: disable_launch_file.exists(),
            ..StateInner::default()
        };
        Self {
            inner: RwLock::new(inner),
            update_hook: OnceCell::new(),
            disable_launch_file,
            stop_sender: Mutex::new(Some(stop_sender)),
            stop_receiver,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StateInner> {
        self.inner.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StateInner> {
        self.inner.write().unwrap_or_else(|p| p.into_inner())
    }

    fn notify(&self) {
        if let Some(hook) = self.update_hook.get() {
            hook(self);
        }
    }

    /// Registers the single update hook. Returns false if one is already set.
    pub fn set_update_hook(&self, hook: UpdateHook) -> bool {
        let registered = self.update_hook.set(hook).is_ok();
        if !registered {
            warn!("Update hook already registered; ignoring");
        }
        registered
    }

    pub fn set_active_card(&self, card: Token) {
        {
            let mut inner = self.write();
            if inner.active_card == card {
                debug!("Ignoring duplicate card");
                return;
            }
            if !card.uid.is_empty() {
                inner.last_scanned = card.clone();
            }
            inner.active_card = card;
        }
        self.notify();
    }

    pub fn active_card(&self) -> Token {
        self.read().active_card.clone()
    }

    pub fn last_scanned(&self) -> Token {
        self.read().last_scanned.clone()
    }

    /// Requests a cooperative shutdown. Once set the flag is never cleared,
    /// and every receiver from [`SharedState::stop_signal`] disconnects.
    pub fn request_stop(&self) {
        self.write().stop_requested = true;
        let sender = self
            .stop_sender
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        drop(sender);
        self.notify();
    }

    pub fn should_stop(&self) -> bool {
        self.read().stop_requested
    }

    /// Channel that never yields a message and disconnects on stop, for use
    /// in `select!` alongside blocking receives.
    pub fn stop_signal(&self) -> Receiver<()> {
        self.stop_receiver.clone()
    }

    pub fn disable_launcher(&self) {
        self.write().launcher_disabled = true;
        if let Err(err) = create_marker(&self.disable_launch_file) {
            warn!(
                error = %err,
                path = %self.disable_launch_file.display(),
                "Cannot create disable launch file"
            );
        }
        self.notify();
    }

    pub fn enable_launcher(&self) {
        self.write().launcher_disabled = false;
        match fs_err::remove_file(&self.disable_launch_file) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.disable_launch_file.display(), "Disable launch file already absent");
            }
            Err(err) => {
                warn!(error = %err, "Cannot remove disable launch file");
            }
        }
        self.notify();
    }

    pub fn is_launcher_disabled(&self) -> bool {
        self.read().launcher_disabled
    }

    pub fn set_database(&self, uid_map: HashMap<String, String>, text_map: HashMap<String, String>) {
        {
            let mut inner = self.write();
            inner.db_load_time = Some(Utc::now());
            inner.uid_map = uid_map;
            inner.text_map = text_map;
        }
        self.notify();
    }

    pub fn database(&self) -> (HashMap<String, String>, HashMap<String, String>) {
        let inner = self.read();
        (inner.uid_map.clone(), inner.text_map.clone())
    }

    pub fn database_load_time(&self) -> Option<DateTime<Utc>> {
        self.read().db_load_time
    }

    pub fn set_reader_connected(&self, reader_type: &str) {
        {
            let mut inner = self.write();
            inner.reader_connected = true;
            inner.reader_type = reader_type.to_string();
        }
        self.notify();
    }

    pub fn set_reader_disconnected(&self) {
        {
            let mut inner = self.write();
            inner.reader_connected = false;
            inner.reader_type.clear();
        }
        self.notify();
    }

    pub fn reader_status(&self) -> (bool, String) {
        let inner = self.read();
        (inner.reader_connected, inner.reader_type.clone())
    }

    /// Stores the live reader handle. Not an observable change, so the hook
    /// is not run; connectivity is reported via `set_reader_connected`.
    pub fn set_reader(&self, reader: Arc<dyn Reader>) {
        self.write().reader = Some(reader);
    }

    pub fn reader(&self) -> Option<Arc<dyn Reader>> {
        self.read().reader.clone()
    }

    pub fn set_write_request(&self, request: &str) {
        self.write().write_request = request.to_string();
        self.notify();
    }

    pub fn write_request(&self) -> String {
        self.read().write_request.clone()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.read();
        StateSnapshot {
            active_card: inner.active_card.clone(),
            last_scanned: inner.last_scanned.clone(),
            reader_connected: inner.reader_connected,
            reader_type: inner.reader_type.clone(),
            stop_requested: inner.stop_requested,
            launcher_disabled: inner.launcher_disabled,
            write_request: inner.write_request.clone(),
            db_load_time: inner.db_load_time,
            uid_mappings: inner.uid_map.len(),
            text_mappings: inner.text_map.len(),
        }
    }
}

fn create_marker(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs_err::create_dir_all(parent)?;
    }
    fs_err::File::create(path)?;
    Ok(())
}
