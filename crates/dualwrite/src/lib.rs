//! Dual-write migration layer.
//!
//! Sits in front of a legacy store and a unified store and, per migration
//! [`Mode`], decides which one serves reads, which ones receive writes and how
//! failures of each are handled. See [`DualWriter`].

#![forbid(unsafe_code)]

pub mod config;
mod mode;
mod mode1;
mod mode2;
mod mode3;
mod mode4;
pub mod observe;
mod writer;

pub use config::{ConfigError, ModeConfig};
pub use mode::{InvalidMode, Mode, ModeStrategy};
pub use mode1::Mode1;
pub use mode2::Mode2;
pub use mode3::Mode3;
pub use mode4::Mode4;
pub use observe::{CollectionDeletion, DriftEvent, DriftSink, MirrorFailure, RecordingSink, TracingSink};
pub use writer::{DualWriter, DEFAULT_RESOURCE};

pub use dualwrite_core as core;
