//! Core infrastructure for relink.
//!
//! This crate provides the pieces shared by the retry scheduler and the
//! reconnection coordinator:
//! - [`Address`] values and their validation
//! - Transport and configuration error types
//! - The serialized [`WorkQueue`] every connection runs on

pub mod address;
pub mod error;
pub mod executor;

pub use address::{Address, AddressParts};
pub use error::{ConfigError, TransportError, TransportErrorKind};
pub use executor::{Schedule, TaskHandle, TimerHandle, WorkQueue};
