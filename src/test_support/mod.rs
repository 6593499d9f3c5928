//! Shared helpers for unit tests.
#![allow(clippy::unwrap_used, dead_code)]

pub mod transport;
