//! Study lifecycle: creation, editing, deletion, and the category
//! consistency guarantor.

pub mod categories;
pub mod service;
pub mod slug;

pub use service::{CategoryEntry, StudyInput, StudyService};
