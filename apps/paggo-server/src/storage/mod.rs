//! Storage module for uploaded documents
//!
//! Files live on the local filesystem under a process-wide storage root and
//! are addressed by a relative key chosen by the caller.

mod local;
mod types;

pub use local::LocalStorage;
pub use types::*;
