//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → accept loop stops → keep-alive workers finish their
//!     current request and close → server waits for idle (bounded)
//! ```
//!
//! # Design Decisions
//! - Blocking connection workers poll `is_triggered` between requests;
//!   async tasks subscribe to the broadcast
//! - Shutdown has a drain deadline; connections still open after it are abandoned

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
