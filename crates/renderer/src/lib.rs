//! Frame pacing on top of the RHI.
//!
//! This crate drives the per-frame loop:
//! - Workspaces (per-frame-in-flight command and sync bundles)
//! - The [`FrameProducer`] hooks an application implements
//! - Image acquisition, surface recreation and presentation
//! - The headless event-line protocol

pub mod headless;
pub mod pacer;
pub mod producer;
pub mod workspace;

pub use headless::{HeadlessEvent, HeadlessParseError};
pub use pacer::FramePacer;
pub use producer::{FrameParams, FrameProducer};
pub use workspace::Workspace;

/// Default number of workspaces (frames in flight).
pub const DEFAULT_WORKSPACES: usize = 2;
