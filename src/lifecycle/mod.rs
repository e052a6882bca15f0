//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     Load config → Validate → Build ResilienceCore → core.start(&shutdown)
//!         → window sweeper task
//!         → breaker decay timer task
//!
//! Shutdown (shutdown.rs):
//!     trigger() → background tasks leave their loops → core.shutdown() clears timers
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;
