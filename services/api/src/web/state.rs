//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use learning_assistant_core::SessionEngine;
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SessionEngine>,
    pub config: Arc<Config>,
}
