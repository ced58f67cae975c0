//! Utility functions and helpers
//!
//! This module contains timestamp utilities shared by the protocol and store layers.

pub mod time;

pub use time::{current_timestamp, current_timestamp_nanos};
