//! Shared types for the reservation backend
//!
//! Domain models, request/response payloads and small utilities used by
//! both the server and its in-process test clients.

pub mod models;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};
