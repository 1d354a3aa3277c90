//! Application state

use std::sync::Arc;

use scan_runner::ScanSession;

/// Shared application state: the one scan session this process hosts.
#[derive(Clone)]
pub struct AppState {
    session: Arc<ScanSession>,
}

impl AppState {
    pub fn new(session: Arc<ScanSession>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<ScanSession> {
        &self.session
    }
}
