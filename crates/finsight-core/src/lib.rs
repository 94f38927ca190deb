//! # finsight-core
//!
//! Core types, traits, and abstractions for the finsight report pipeline.
//!
//! This crate provides the foundational data structures and trait definitions
//! that the other finsight crates depend on: the `Report` aggregate, the
//! repository and storage seams, and the shared error type.

pub mod defaults;
pub mod error;
pub mod file_safety;
pub mod logging;
pub mod models;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use file_safety::{detect_mime_type, sanitize_filename, validate_upload, ValidationResult};
pub use models::*;
pub use traits::*;
pub use uuid_utils::new_v7;
