//! Foundational low-level utilities shared across voxcal crates.
//!
//! Provides the atomic read/write helpers used for the persisted calendar
//! session blob and the unix-time helpers used for conversation expiry.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::{read_text_if_present, write_text_atomic};
pub use time_utils::{
    current_unix_timestamp, current_unix_timestamp_ms, expiry_after, is_expired_unix,
};
