//! Session Management Module
//!
//! Registry of live SSH sessions keyed by id, each with its connection and
//! optional interactive PTY, plus recording of PTY output.

pub mod recording;
pub mod registry;

pub use recording::{RecordingState, SessionRecorder, SessionRecording};
pub use registry::{RegistryError, SessionInfo, SessionRegistry};
