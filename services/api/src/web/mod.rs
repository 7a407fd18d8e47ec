pub mod protocol;
pub mod rest;
pub mod state;

// Re-export the router builder so the binary can assemble the web server.
pub use rest::{router, ApiDoc};
pub use state::AppState;
