//! Outbound calls to GitHub.
//!
//! Modules talk to the platform through the [`PlatformClient`] trait so that
//! tests can substitute a recording double. [`OctocrabPlatform`] is the real
//! implementation.

mod client;
mod error;

pub use client::{OctocrabPlatform, PlatformClient};
pub use error::{PlatformError, PlatformErrorKind};
