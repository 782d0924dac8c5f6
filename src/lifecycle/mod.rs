//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Connect store → Build server → Bind listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Stop limiter sweep
//!     → Drain background tasks (background.rs) → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then store, then listener
//! - Ordered shutdown: stop accept, drain, close
//! - Drain has a timeout: exit proceeds after the deadline

pub mod background;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use background::BackgroundTasks;
pub use shutdown::Shutdown;
