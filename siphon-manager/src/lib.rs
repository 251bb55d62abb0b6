//! In-cluster session manager: presence tracking for clients and agents,
//! watch fan-out, and intercept lifecycle. See `siphon_manager::core` for
//! the transport-agnostic domain logic and `siphon_manager::grpc` for the
//! tonic service built on top of it.

pub mod core;
pub mod error;
pub mod grpc;

pub use core::Manager;
pub use error::{Error, Result};
