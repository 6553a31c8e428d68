//! Rendering: the scene compositor, content plugins, transitions, and the
//! low-level pixel helpers they share.

pub mod effects;
pub mod engine;
pub mod font;
pub mod plugins;
pub mod schedule;
pub mod surface;
