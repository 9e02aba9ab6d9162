//! audiodrop server - M4A to MP3 conversion with short-lived downloads
//!
//! Uploaded files are converted by an external transcoder, stored under a
//! random identifier, and deleted once their retention window elapses.

pub mod config;
pub mod error;
pub mod gateway;
pub mod pipeline;
pub mod retention;
pub mod routes;
pub mod state;
pub mod store;
pub mod transcoder;

pub use config::ServiceConfig;
pub use error::AppError;
pub use routes::create_router;
pub use state::AppState;
