//! JSON-RPC API Layer
//!
//! JSON-RPC 2.0 front for Workgate. Every method is a thin call into
//! `ComputeService`; admission, validation and persistence live in core.

pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use server::{RpcServer, RpcServerConfig};
