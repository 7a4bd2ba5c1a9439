//! `jobtree-core` — identifiers and the error model shared by the job engine.
//!
//! This crate has no storage or runtime concerns.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{JobId, OwnerId};
