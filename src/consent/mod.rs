//! Consent versioning
//!
//! Every consent decision becomes a new immutable version with a
//! content-addressed receipt; withdrawal is just another version with all
//! choices denied. Old versions are never touched.

pub mod engine;
pub mod receipt;

pub use engine::{CategoryDecision, ConsentEngine};
