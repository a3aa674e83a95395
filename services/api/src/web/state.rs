//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use schedule_rpa_core::SchedulingService;
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: SchedulingService,
    pub config: Arc<Config>,
}
