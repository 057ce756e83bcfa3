//! API state and handlers.

pub mod buffers;
pub mod error;

use std::sync::Arc;

use crate::inactivity::InactivityTracker;
use crate::store::Store;

/// Application state handed to every handler.
#[derive(Clone, Debug)]
pub struct AppState {
    /// The storage engine, with its coordination registries.
    pub store: Arc<Store>,
    /// Last-request clock for the inactivity monitor.
    pub inactivity: Arc<InactivityTracker>,
}

impl AppState {
    /// Builds the state around a store.
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            inactivity: Arc::new(InactivityTracker::new()),
        }
    }
}
