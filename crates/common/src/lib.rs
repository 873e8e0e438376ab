//! Shared types for the creator token services

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::{Secret, preview};
