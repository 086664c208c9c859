//! The `utils` module provides a collection of utility functions and common
//! definitions used across `topicmux`.
//!
//! It centralizes the error type shared by every layer and the tracing
//! subscriber setup used by applications embedding the client.

pub mod error;
pub mod logging;

pub use error::{MuxError, Result};
