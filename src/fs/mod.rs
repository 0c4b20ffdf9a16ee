//! Filesystem metadata access
//!
//! Thin layer over lstat/readdir with the error taxonomy and retry
//! behavior the scanner depends on.

pub mod stat;

pub use stat::{ClampBounds, EntryKind, StatRecord};
