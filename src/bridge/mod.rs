//! Cross-platform message bridge.
//!
//! ## Module Structure
//!
//! - `channels`: Update queue and shutdown signal wiring
//! - `orchestrator`: Reconciliation and fan-out (`Bridge` struct)

pub mod channels;
pub mod orchestrator;

pub use channels::ChannelBundle;
pub use orchestrator::Bridge;
