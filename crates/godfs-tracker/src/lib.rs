//! Instance registry for godfs trackers.
//!
//! A tracker holds a soft-state view of who is alive: every instance that
//! heartbeats gets an expiry deadline, and a background sweep removes entries
//! whose deadline has passed. There is no leave message and no coordination
//! between trackers; each one is authoritative only for the instances that
//! register with it.
//!
//! ```text
//! Unknown --register--> Registered --heartbeat--> Registered
//!                           |
//!                           +--deadline passes, sweep--> removed
//! ```

mod error;
mod registry;
pub mod verified;

pub use error::RegistryError;
pub use registry::InstanceRegistry;
pub use registry::RegisterOutcome;
pub use registry::RegisteredInstance;
pub use registry::RegistryConfig;
