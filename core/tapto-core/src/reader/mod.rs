//! Reader capability and scan events.
//!
//! A reader runs its own producer thread and pushes [`ScanEvent`]s into the
//! sink it was opened with. The session loop never talks to hardware
//! directly, only to this trait.

mod file;

pub use file::FileReader;

use crossbeam_channel::Sender;

use crate::error::ReaderError;
use crate::token::Token;

/// One raw event from a reader.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// A token is present on the reader.
    Token(Token),
    /// No token is present (the card left the reader).
    Removed,
    /// The reader saw something it could not decode.
    Error(ReaderError),
}

pub trait Reader: Send + Sync {
    /// Returns a device identifier the reader can open, if one is found.
    fn detect(&self, hint: Option<&str>) -> Option<String>;

    /// Opens `device` and starts producing events into `sink`.
    fn open(&self, device: &str, sink: Sender<ScanEvent>) -> Result<(), ReaderError>;

    fn connected(&self) -> bool;

    fn close(&self) -> Result<(), ReaderError>;

    /// Human-readable reader technology, reported in the shared state.
    fn reader_type(&self) -> String;
}
