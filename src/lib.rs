//! Runtime loader for a generic, trait-based VM type system.
//!
//! Templates live in an immutable [`assembly::AssemblyStore`]. The [`Loader`]
//! instantiates them on demand into shared [`types::RuntimeType`] and
//! [`types::RuntimeFunction`] objects, checking generic constraints, computing
//! layouts and linking virtual and interface tables along the way.
pub mod assembly;
pub mod config;
mod constraint;
pub mod error;
pub mod loader;
pub mod types;

pub use config::LoaderConfig;
pub use error::{ErrorCode, LoaderError, LoaderResult};
pub use loader::Loader;
