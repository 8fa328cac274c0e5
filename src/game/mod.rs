//! Word Domain Module
//!
//! Dictionary and combo handling, free of any transport or session
//! concerns. Everything here is immutable after boot so sessions can share
//! one validator by reference.

pub mod words;

// Re-export key types
pub use words::{WordCheck, WordListError, WordValidator};
