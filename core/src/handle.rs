//! The navigation runtime boundary.
//!
//! Every call into the underlying navigation runtime can fail; nothing in
//! the recovery subsystem is allowed to propagate those failures past its
//! own surface. `SharedHandle` is the single attachment point and the
//! uniform guard: callers that run before attachment get `None`/`Err`
//! results and a log line, never a panic.

use std::sync::Arc;
use std::sync::RwLock;

use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::snapshot::NavigationSnapshot;

/// Failure surfaced by a navigation runtime call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandleError {
    #[error("navigation handle not attached")]
    Unavailable,

    #[error("navigation dispatch failed: {0}")]
    Dispatch(String),

    #[error("authentication required: {0}")]
    Auth(String),

    #[error("network unavailable: {0}")]
    Offline(String),
}

/// The route currently focused by the navigator.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteInfo {
    pub name: String,
    pub params: Option<Map<String, Value>>,
}

/// Descriptor for a full stack reset dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct ResetDescriptor {
    pub index: usize,
    pub routes: Vec<ResetRoute>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResetRoute {
    pub name: String,
    pub params: Option<Map<String, Value>>,
}

impl ResetDescriptor {
    /// A single-route stack, used for default/home resets.
    pub fn single(name: impl Into<String>) -> Self {
        Self {
            index: 0,
            routes: vec![ResetRoute {
                name: name.into(),
                params: None,
            }],
        }
    }

    /// Rebuild a reset descriptor from a stored snapshot.
    pub fn from_snapshot(snapshot: &NavigationSnapshot) -> Self {
        Self {
            index: snapshot.index,
            routes: snapshot
                .routes
                .iter()
                .map(|route| ResetRoute {
                    name: route.name.clone(),
                    params: route.params.clone(),
                })
                .collect(),
        }
    }
}

/// Contract the navigation runtime exposes to the recovery subsystem.
///
/// Implementations wrap whatever navigator the host application uses; the
/// recovery layer only ever reaches it through [`SharedHandle`].
pub trait NavigationHandle: Send + Sync {
    fn navigate(&self, route: &str, params: Option<&Map<String, Value>>)
    -> Result<(), HandleError>;

    fn dispatch_reset(&self, descriptor: &ResetDescriptor) -> Result<(), HandleError>;

    fn can_go_back(&self) -> bool;

    fn go_back(&self) -> Result<(), HandleError>;

    /// Currently focused route, if the navigator is mounted.
    fn current_route(&self) -> Option<RouteInfo>;

    /// Raw root navigation state. May be structurally invalid; callers
    /// clean and validate before use.
    fn root_state(&self) -> Option<Value>;
}

/// Clonable attachment point for the navigation runtime.
///
/// Attached once by the host before first use; all recovery components
/// share one `SharedHandle` and degrade gracefully while it is empty.
#[derive(Clone, Default)]
pub struct SharedHandle {
    inner: Arc<RwLock<Option<Arc<dyn NavigationHandle>>>>,
}

impl SharedHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, handle: Arc<dyn NavigationHandle>) {
        if let Ok(mut slot) = self.inner.write() {
            *slot = Some(handle);
        }
    }

    pub fn detach(&self) {
        if let Ok(mut slot) = self.inner.write() {
            *slot = None;
        }
    }

    pub fn is_attached(&self) -> bool {
        self.inner.read().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Current handle, if attached.
    pub fn get(&self) -> Option<Arc<dyn NavigationHandle>> {
        self.inner.read().ok().and_then(|slot| slot.clone())
    }

    /// Run a fallible call against the handle, converting "not attached"
    /// into [`HandleError::Unavailable`].
    pub fn call<T>(
        &self,
        op: impl FnOnce(&dyn NavigationHandle) -> Result<T, HandleError>,
    ) -> Result<T, HandleError> {
        match self.get() {
            Some(handle) => op(handle.as_ref()),
            None => Err(HandleError::Unavailable),
        }
    }

    /// Boolean-guarded dispatch used on recovery paths: failures are
    /// logged and collapsed to `false`.
    pub fn try_call(
        &self,
        what: &str,
        op: impl FnOnce(&dyn NavigationHandle) -> Result<(), HandleError>,
    ) -> bool {
        match self.call(op) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(operation = what, error = %err, "navigation handle call failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for SharedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedHandle")
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]
    use super::*;
    use crate::snapshot::RouteEntry;
    use pretty_assertions::assert_eq;

    struct NoopHandle;

    impl NavigationHandle for NoopHandle {
        fn navigate(
            &self,
            _route: &str,
            _params: Option<&Map<String, Value>>,
        ) -> Result<(), HandleError> {
            Ok(())
        }

        fn dispatch_reset(&self, _descriptor: &ResetDescriptor) -> Result<(), HandleError> {
            Ok(())
        }

        fn can_go_back(&self) -> bool {
            false
        }

        fn go_back(&self) -> Result<(), HandleError> {
            Err(HandleError::Dispatch("nothing to pop".into()))
        }

        fn current_route(&self) -> Option<RouteInfo> {
            None
        }

        fn root_state(&self) -> Option<Value> {
            None
        }
    }

    #[test]
    fn unattached_handle_degrades_to_unavailable() {
        let shared = SharedHandle::new();
        assert!(!shared.is_attached());
        assert_eq!(
            Err(HandleError::Unavailable),
            shared.call(|h| h.navigate("Home", None))
        );
        assert!(!shared.try_call("navigate", |h| h.navigate("Home", None)));
    }

    #[test]
    fn attach_then_detach() {
        let shared = SharedHandle::new();
        shared.attach(Arc::new(NoopHandle));
        assert!(shared.is_attached());
        assert!(shared.try_call("navigate", |h| h.navigate("Home", None)));

        shared.detach();
        assert!(!shared.is_attached());
    }

    #[test]
    fn reset_descriptor_from_snapshot_keeps_order_and_index() {
        let snap = NavigationSnapshot {
            index: 1,
            routes: vec![RouteEntry::new("Home", "h"), RouteEntry::new("Map", "m")],
            route_names: Vec::new(),
            stack_type: None,
        };
        let descriptor = ResetDescriptor::from_snapshot(&snap);
        assert_eq!(1, descriptor.index);
        assert_eq!(
            vec!["Home".to_string(), "Map".to_string()],
            descriptor
                .routes
                .iter()
                .map(|r| r.name.clone())
                .collect::<Vec<_>>()
        );
    }
}
