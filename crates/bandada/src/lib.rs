//! Bandada: a concurrent browser-fleet load harness.
//!
//! Bandada (Spanish: "flock") opens N concurrent browser clients against a
//! real-time multiplayer web game, watches each client's console channel for
//! the literal completion signal `"Game over"`, optionally captures a
//! screenshot and an in-page state snapshot when a per-client timer fires,
//! and terminates deterministically once every client has finished.
//!
//! The fleet core is browser-agnostic: sessions are opaque [`ClientSession`]
//! handles. With the `browser` feature enabled, sessions run in a real
//! headless Chromium over the Chrome `DevTools` Protocol; scripted sessions
//! are always available for browser-free runs and tests.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "browser")]
//! # async fn demo() -> bandada::HarnessResult<()> {
//! use bandada::{CdpLaunchOptions, CdpSessionProvider, Fleet, FleetConfig};
//!
//! let config = FleetConfig::new()
//!     .with_clients(8)
//!     .with_url("http://localhost:8080/pairs/");
//! let mut provider = CdpSessionProvider::launch(CdpLaunchOptions::default()).await?;
//! let summary = Fleet::new(config).run(&mut provider).await?;
//! println!("{} clients finished in {:?}", summary.finished, summary.elapsed);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod capture;
mod config;
mod event;
mod fleet;
mod result;
pub mod session;
mod stats;

pub use config::{FleetConfig, DEFAULT_CLIENTS, DEFAULT_URL};
pub use event::{InternalFault, SessionEvent, StackFrame};
pub use fleet::{is_completion, is_error_text, Fleet, FleetSummary, COMPLETION_SIGNAL};
pub use result::{HarnessError, HarnessResult};
pub use stats::{sweep_csv, RunStats, SweepRow, SWEEP_CSV_HEADER};
pub use session::{ClientSession, SessionProvider};

#[cfg(feature = "browser")]
pub use session::cdp::{CdpLaunchOptions, CdpSessionProvider};
