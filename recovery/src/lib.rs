//! Failure-recovery layer for an embedded navigation subsystem.
//!
//! Three cooperating components, all reaching the navigation runtime
//! through a single [`SharedHandle`](wayfarer_core::SharedHandle):
//!
//! - [`retry::RetryQueue`] — re-executes failed navigation actions with
//!   exponential backoff and jitter, one independent timer per item.
//! - [`state::StateRecoveryStore`] — snapshots, validates, and restores
//!   the navigation stack, with a rolling backup history and named
//!   checkpoints.
//! - [`dispatch::RecoveryDispatcher`] — classifies failures (navigation /
//!   auth / network) and produces the matching recovery strategy.
//!
//! Design rule shared by every component: no recovery-path function
//! throws. Boundary calls degrade to booleans or `None` plus a tracing
//! event, so callers stay simple.

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod dispatch;
pub mod error;
pub mod retry;
pub mod state;

pub use dispatch::{
    DispatcherConfig, ErrorContext, FailureKind, NavigationRestriction, RecoveryDispatcher,
    RecoveryPlan, classify,
};
pub use error::{RecoveryError, Result};
pub use retry::{
    QueueStatus, RetryAction, RetryItemSnapshot, RetryOptions, RetryOutcome, RetryQueue,
    RetryStatus, RetryTicket,
};
pub use state::{StateRecoveryStore, StateStats, StateStoreConfig};
