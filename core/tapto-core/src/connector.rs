//! Keeps a connected reader registered in [`SharedState`].
//!
//! The connector does not retry on its own. The session loop calls
//! [`ReaderConnector::ensure_connected`] at the top of every iteration and
//! paces retries itself.

use crossbeam_channel::Sender;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::ReaderError;
use crate::reader::{Reader, ScanEvent};
use crate::state::SharedState;

/// Builds a fresh reader instance for every connection attempt.
pub type ReaderFactory = Box<dyn Fn() -> Arc<dyn Reader> + Send + Sync>;

pub struct ReaderConnector {
    factory: ReaderFactory,
    connection_string: Option<String>,
    probe_device: bool,
}

impl ReaderConnector {
    pub fn new(factory: ReaderFactory, connection_string: Option<String>, probe_device: bool) -> Self {
        Self {
            factory,
            connection_string: connection_string.filter(|value| !value.trim().is_empty()),
            probe_device,
        }
    }

    /// Opens a new reader when none is registered or the registered one
    /// reports disconnected. Events from the reader go to `sink`.
    pub fn ensure_connected(
        &self,
        state: &SharedState,
        sink: &Sender<ScanEvent>,
    ) -> Result<(), ReaderError> {
        if let Some(current) = state.reader() {
            if current.connected() {
                return Ok(());
            }
            if state.reader_status().0 {
                state.set_reader_disconnected();
            }
        }

        info!("Reader not connected, attempting connection");
        let reader = (self.factory)();

        let device = match &self.connection_string {
            Some(device) => device.clone(),
            None if self.probe_device => {
                debug!("No device specified, attempting to detect");
                reader.detect(None).ok_or(ReaderError::NoReaderDetected)?
            }
            None => return Err(ReaderError::NoReaderDetected),
        };

        reader.open(&device, sink.clone())?;
        info!(device = %device, reader_type = %reader.reader_type(), "Reader connected");

        state.set_reader_connected(&reader.reader_type());
        state.set_reader(reader);
        Ok(())
    }
}
