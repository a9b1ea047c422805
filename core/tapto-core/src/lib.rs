//! # tapto-core
//!
//! Reader session logic for the TapTo daemon: turns raw NFC scan events into
//! launch requests and tracks card removal so a running title can be exited.
//!
//! ## Design Principles
//!
//! - **Synchronous**: no async runtime. The session loop owns one thread and
//!   blocks on crossbeam channels; readers run their own producer thread.
//! - **Single shared state**: [`SharedState`] is the only mutable resource
//!   shared between threads. Setters mutate under the lock and notify the
//!   update hook after releasing it.
//! - **Capabilities at the seams**: hardware ([`Reader`]) and the host
//!   platform ([`Platform`]) are traits so the session loop can be driven
//!   deterministically in tests.
//! - **Nothing is fatal**: reader errors are retried, scan errors beep,
//!   side-effect failures are logged.

pub mod config;
pub mod connector;
pub mod error;
pub mod mappings;
pub mod platform;
pub mod queue;
pub mod reader;
pub mod session;
pub mod state;
pub mod token;

pub use config::{load_config, PlatformConfig, ReaderConfig, TaptoConfig};
pub use connector::{ReaderConnector, ReaderFactory};
pub use error::{PlatformError, ReaderError, Result, TaptoError};
pub use mappings::{load_mappings, resolve_launch_text, Mappings};
pub use platform::{CommandPlatform, Platform};
pub use queue::LaunchQueue;
pub use reader::{FileReader, Reader, ScanEvent};
pub use session::{LoopInput, ScanEventProcessor, ScanOutcome, SessionMachine};
pub use state::{SharedState, StateSnapshot, UpdateHook};
pub use token::{Fingerprint, Token, TokenKind};
