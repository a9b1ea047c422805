//! Reader driver backed by a plain text file.
//!
//! The file stands in for the reader surface: writing a token into it is a
//! tap, truncating or deleting it is a removal. Layout is either a single
//! line (the payload; uid becomes its digest) or `uid` on the first line
//! followed by the payload.

use crossbeam_channel::Sender;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Reader, ScanEvent};
use crate::error::ReaderError;
use crate::token::{Token, TokenKind};

const READER_TYPE: &str = "File";

#[derive(Debug)]
pub struct FileReader {
    detect_paths: Vec<PathBuf>,
    poll_interval: Duration,
    connected: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FileReader {
    pub fn new(detect_paths: Vec<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            detect_paths,
            poll_interval,
            connected: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }
}

impl Reader for FileReader {
    fn detect(&self, hint: Option<&str>) -> Option<String> {
        let hinted = hint.map(PathBuf::from);
        hinted
            .iter()
            .chain(self.detect_paths.iter())
            .find(|path| path.is_file())
            .map(|path| path.to_string_lossy().to_string())
    }

    fn open(&self, device: &str, sink: Sender<ScanEvent>) -> Result<(), ReaderError> {
        let path = PathBuf::from(device);
        let parent_exists = path
            .parent()
            .map(|parent| parent.as_os_str().is_empty() || parent.is_dir())
            .unwrap_or(false);
        if !parent_exists {
            return Err(ReaderError::OpenFailed {
                device: device.to_string(),
                details: "parent directory does not exist".to_string(),
            });
        }

        let mut worker = self.worker.lock().unwrap_or_else(|p| p.into_inner());
        if worker.is_some() {
            return Err(ReaderError::OpenFailed {
                device: device.to_string(),
                details: "reader is already open".to_string(),
            });
        }

        self.connected.store(true, Ordering::SeqCst);
        let connected = Arc::clone(&self.connected);
        let poll_interval = self.poll_interval;
        let handle = thread::Builder::new()
            .name("tapto-file-reader".to_string())
            .spawn(move || poll_file(&path, poll_interval, &connected, &sink))
            .map_err(|err| {
                self.connected.store(false, Ordering::SeqCst);
                ReaderError::OpenFailed {
                    device: device.to_string(),
                    details: err.to_string(),
                }
            })?;
        *worker = Some(handle);

        info!(device, "File reader opened");
        Ok(())
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> Result<(), ReaderError> {
        self.connected.store(false, Ordering::SeqCst);
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|_| ReaderError::CloseFailed("reader thread panicked".to_string()))?;
        }
        Ok(())
    }

    fn reader_type(&self) -> String {
        READER_TYPE.to_string()
    }
}

fn poll_file(path: &Path, poll_interval: Duration, connected: &AtomicBool, sink: &Sender<ScanEvent>) {
    let mut last_contents: Option<String> = None;

    while connected.load(Ordering::SeqCst) {
        let event = match fs_err::read_to_string(path) {
            Ok(contents) if !contents.trim().is_empty() => {
                if last_contents.as_deref() == Some(contents.as_str()) {
                    None
                } else {
                    let event = match parse_token(&contents) {
                        Ok(token) => ScanEvent::Token(token),
                        Err(err) => ScanEvent::Error(err),
                    };
                    last_contents = Some(contents);
                    Some(event)
                }
            }
            Ok(_) => {
                last_contents = None;
                Some(ScanEvent::Removed)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                last_contents = None;
                Some(ScanEvent::Removed)
            }
            Err(err) => Some(ScanEvent::Error(ReaderError::ReadFailed(err.to_string()))),
        };

        if let Some(event) = event {
            if sink.send(event).is_err() {
                debug!("Scan sink dropped; stopping file reader");
                break;
            }
        }

        thread::sleep(poll_interval);
    }

    connected.store(false, Ordering::SeqCst);
}

pub(crate) fn parse_token(contents: &str) -> Result<Token, ReaderError> {
    let mut lines = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty());
    let first = lines
        .next()
        .ok_or_else(|| ReaderError::MalformedToken("token file is empty".to_string()))?;
    let rest: Vec<&str> = lines.collect();

    let (uid, text) = if rest.is_empty() {
        (format!("{:x}", md5::compute(first)), first.to_string())
    } else {
        (first.to_string(), rest.join("\n"))
    };

    if uid.chars().any(char::is_whitespace) {
        warn!(uid = %uid, "Token uid contains whitespace");
        return Err(ReaderError::MalformedToken(format!("invalid uid {:?}", uid)));
    }

    Ok(Token::new(TokenKind::File, uid, text))
}
