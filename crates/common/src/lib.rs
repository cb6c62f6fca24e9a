//! Shared types for the photo-store workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
