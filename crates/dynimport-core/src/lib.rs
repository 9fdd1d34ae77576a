//! # dynimport Core
//!
//! Resource graph for the one-shot CSV-to-DynamoDB import stack: parameters,
//! least-privilege statements, the worker role and the compute unit bound to it.

pub mod backend;
pub mod compute;
pub mod config;
pub mod error;
pub mod naming;
pub mod params;
pub mod permissions;
pub mod role;
pub mod stack;
pub mod template;
pub mod types;

pub use backend::*;
pub use compute::*;
pub use config::*;
pub use error::*;
pub use params::*;
pub use permissions::*;
pub use role::*;
pub use stack::*;
pub use template::*;
pub use types::*;
