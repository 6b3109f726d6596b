//! hostvisor - Host process supervisor
//!
//! A small front-door process that:
//! - Launches the host application and waits for it to exit
//! - Relays SIGUSR1 from the operator to the host
//! - Restarts the host when it asks for it
//! - Swaps in updates the host staged on disk, with rollback
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                   Supervisor                     │
//! ├─────────────────────────────────────────────────┤
//! │ Host Process │ Signal Relay │ Exit Classification│
//! ├─────────────────────────────────────────────────┤
//! │                 Update Applier                   │
//! ├─────────────────────────────────────────────────┤
//! │     Layout      │   Runtime Locator  │ Platform  │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod layout;
pub mod locator;
pub mod platform;
pub mod shutdown;
pub mod supervisor;

pub use layout::{Layout, LayoutError};
pub use platform::PlatformTraits;
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorError};
