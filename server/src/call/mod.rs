//! Call signaling: per-pair sessions relaying WebRTC signals and raw audio.

pub mod session;
pub mod signaling;

pub use session::{CallKey, CallSessions};
