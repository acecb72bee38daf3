//! In-process tracking and coordination of executing agent turns.

pub mod registry;

pub use registry::{RalHandle, RalRegistry};
