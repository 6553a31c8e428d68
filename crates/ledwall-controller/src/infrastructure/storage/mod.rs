//! On-disk persistence: controller configuration, the program library, the
//! media directory, and file-transfer staging.

pub mod config;
pub mod programs;
