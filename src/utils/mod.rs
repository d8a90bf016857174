//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `popstellar` hub.
//!
//! It centralizes the error taxonomy shared by every handler and the logging
//! bootstrap used by the binary and by tests.

pub mod error;
pub mod logging;

pub use error::{ErrorBody, HubError, HubResult};
