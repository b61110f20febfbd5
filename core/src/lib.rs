//! Shared contracts for the wayfarer navigation recovery subsystem.
//!
//! This crate defines the boundaries the recovery layer operates across:
//! the navigation runtime (`NavigationHandle`), the persistent key-value
//! store (`PersistentStore`), and the cleaned/validated snapshot model
//! (`NavigationSnapshot`) that flows between them. It contains no recovery
//! policy of its own; see the `wayfarer-recovery` crate for the retry
//! queue, state store, and error dispatcher built on top of these seams.

pub mod handle;
pub mod snapshot;
pub mod store;

pub use handle::{
    HandleError, NavigationHandle, ResetDescriptor, ResetRoute, RouteInfo, SharedHandle,
};
pub use snapshot::{NavigationSnapshot, RouteEntry, clean_navigation_state, validate_navigation_state};
pub use store::{MemoryStore, PersistentStore, StoreError};
