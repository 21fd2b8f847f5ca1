//! Refract API Library
//!
//! HTTP surface of the transformation service: routes, handlers, error
//! responses and application setup.

mod handlers;
pub mod setup;
pub mod telemetry;

pub mod error;
pub mod state;

pub use error::{ErrorResponse, HttpAppError};
pub use state::AppState;
