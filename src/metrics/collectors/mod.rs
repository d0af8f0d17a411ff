//! Per-subsystem parsers.
//!
//! Each function takes already-fetched text and returns the metric
//! families it yields. Remote I/O stays in [`super::collector`].

pub mod network;
pub mod storage;
pub mod system;
