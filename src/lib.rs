#![forbid(unsafe_code)]

//! # supplywatch
//!
//! Single-process polling bot that mirrors organized-crime supply requests
//! from the Torn API into a spreadsheet work queue and reconciles provider
//! send-logs back into it.
//!
//! The interesting part is the resilience core every external call goes
//! through:
//!
//! - **Retry executor** ([`retry`]): generic bounded/unbounded retries with
//!   exponential backoff, jitter, per-attempt timeouts, and prompt
//!   cancellation.
//! - **Profiles** ([`profiles`]): the per-call-class timing tables, in
//!   bounded and unbounded variants.
//! - **Notification circuit breaker** ([`notify`]): consecutive-failure
//!   breaker with a half-open probe, wrapped around fire-and-forget push
//!   delivery.
//! - **Orchestration loop** ([`app`]): one cycle per minute, with panic
//!   recovery feeding failures back through the retry executor so the
//!   process never dies.
//!
//! Everything else is data plumbing between the game API ([`game`]), the
//! spreadsheet ([`sheet`]), and the provider roster ([`providers`]).

pub mod app;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod game;
pub mod notify;
pub mod profiles;
pub mod provided;
pub mod providers;
pub mod resolution;
pub mod retry;
pub mod sheet;
pub mod sleeper;
pub mod supplied;

// Re-exports
pub use app::App;
pub use config::AppConfig;
pub use error::{ApiError, AttemptError, Retryable, RetryError};
pub use game::{GameApi, TornClient};
pub use notify::{NotifyClient, NotifyConfig};
pub use profiles::RetryProfiles;
pub use retry::RetryPolicy;
pub use sheet::{SheetStore, SheetsClient};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
