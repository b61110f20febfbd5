//! Error classification and recovery dispatch.
//!
//! Given a failed navigation call plus context, decide which failure
//! class it belongs to and hand the caller a matching strategy: a
//! re-runnable recovery action for plain navigation failures, an
//! immediate auth redirect, or a route-restriction directive for offline
//! conditions. Every path here collapses handle failures to booleans.

use serde_json::Map;
use serde_json::Value;
use wayfarer_core::HandleError;
use wayfarer_core::ResetDescriptor;
use wayfarer_core::SharedHandle;

/// Ephemeral context for one classify-and-dispatch call. Not persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorContext {
    /// Screen or component that reported the failure.
    pub component_name: String,
    /// Route the failed action was trying to reach.
    pub route_name: Option<String>,
    /// Route that was focused when the failure happened.
    pub current_route: Option<String>,
    pub retry_count: u32,
    pub extra: Map<String, Value>,
}

impl ErrorContext {
    pub fn for_component(component_name: impl Into<String>) -> Self {
        Self {
            component_name: component_name.into(),
            ..Default::default()
        }
    }

    pub fn with_route(mut self, route_name: impl Into<String>) -> Self {
        self.route_name = Some(route_name.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Navigation,
    Auth,
    Network,
}

/// Classify a handle failure. Explicitly tagged variants map directly;
/// generic dispatch failures fall back to message heuristics.
pub fn classify(error: &HandleError) -> FailureKind {
    match error {
        HandleError::Auth(_) => FailureKind::Auth,
        HandleError::Offline(_) => FailureKind::Network,
        HandleError::Unavailable => FailureKind::Navigation,
        HandleError::Dispatch(message) => classify_message(message),
    }
}

fn classify_message(message: &str) -> FailureKind {
    let lower = message.to_lowercase();
    if lower.contains("unauthorized")
        || lower.contains("unauthenticated")
        || lower.contains("401")
        || lower.contains("token expired")
        || lower.contains("session expired")
    {
        FailureKind::Auth
    } else if lower.contains("network")
        || lower.contains("offline")
        || lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("fetch")
        || lower.contains("connection")
    {
        FailureKind::Network
    } else {
        FailureKind::Navigation
    }
}

/// Directive for the UI layer while offline: no handle calls involved,
/// the caller enforces the restriction itself.
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationRestriction {
    pub show_offline_message: bool,
    pub limit_navigation: bool,
    pub allowed_routes: Vec<String>,
}

/// What the dispatcher decided for one failure.
#[derive(Debug)]
pub enum RecoveryPlan {
    /// Transient navigation failure; invoke [`RecoveryAction::run`] to
    /// retry the original navigation.
    Retry(RecoveryAction),
    /// Auth failure; the redirect reset was dispatched synchronously.
    AuthRedirect { dispatched: bool },
    /// Offline condition; the caller restricts routes itself.
    Restrict(NavigationRestriction),
}

/// Deferred retry of the navigation that originally failed.
///
/// Never propagates handle failures; `run` returns `false` instead.
#[derive(Debug, Clone)]
pub struct RecoveryAction {
    handle: SharedHandle,
    context: ErrorContext,
}

impl RecoveryAction {
    pub fn run(&self) -> bool {
        retry_navigation_with(&self.handle, &self.context)
    }
}

fn retry_navigation_with(handle: &SharedHandle, context: &ErrorContext) -> bool {
    let Some(route) = context.route_name.as_deref() else {
        tracing::debug!(
            component = %context.component_name,
            "retry skipped: context has no target route"
        );
        return false;
    };
    handle.try_call("retry_navigation", |h| h.navigate(route, None))
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub home_route: String,
    pub auth_route: String,
    pub fallback_route: String,
    /// Routes that stay reachable while offline.
    pub offline_allowed_routes: Vec<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            home_route: "Home".to_string(),
            auth_route: "SignIn".to_string(),
            fallback_route: "Home".to_string(),
            offline_allowed_routes: vec![
                "Home".to_string(),
                "Settings".to_string(),
                "Offline".to_string(),
            ],
        }
    }
}

/// Entry point screens and error boundaries report failures to.
#[derive(Debug, Clone)]
pub struct RecoveryDispatcher {
    handle: SharedHandle,
    config: DispatcherConfig,
}

impl RecoveryDispatcher {
    pub fn new(handle: SharedHandle) -> Self {
        Self::with_config(handle, DispatcherConfig::default())
    }

    pub fn with_config(handle: SharedHandle, config: DispatcherConfig) -> Self {
        Self { handle, config }
    }

    /// Classify `error` and produce the matching recovery strategy.
    pub fn dispatch(&self, error: &HandleError, context: ErrorContext) -> RecoveryPlan {
        match classify(error) {
            FailureKind::Navigation => {
                log_navigation_error(error, &context);
                RecoveryPlan::Retry(RecoveryAction {
                    handle: self.handle.clone(),
                    context,
                })
            }
            FailureKind::Auth => {
                log_auth_error(error, &context);
                let descriptor = ResetDescriptor::single(self.config.auth_route.clone());
                let dispatched = self
                    .handle
                    .try_call("auth_redirect", |h| h.dispatch_reset(&descriptor));
                RecoveryPlan::AuthRedirect { dispatched }
            }
            FailureKind::Network => {
                log_network_error(error, &context);
                RecoveryPlan::Restrict(NavigationRestriction {
                    show_offline_message: true,
                    limit_navigation: true,
                    allowed_routes: self.config.offline_allowed_routes.clone(),
                })
            }
        }
    }

    /// Re-issue the navigation named in `context`. Returns `false` on any
    /// failure, including a missing target route.
    pub fn retry_navigation(&self, context: &ErrorContext) -> bool {
        retry_navigation_with(&self.handle, context)
    }

    /// Navigate to the fixed fallback route, degrading to a full stack
    /// reset when even that fails.
    pub fn navigate_to_fallback(&self) -> bool {
        let route = self.config.fallback_route.clone();
        if self
            .handle
            .try_call("fallback_navigate", |h| h.navigate(&route, None))
        {
            return true;
        }
        tracing::warn!(route = %route, "fallback navigation failed, resetting stack");
        self.reset_navigation_stack()
    }

    /// Dispatch a reset to the default single-route stack.
    pub fn reset_navigation_stack(&self) -> bool {
        let descriptor = ResetDescriptor::single(self.config.home_route.clone());
        self.handle
            .try_call("stack_reset", |h| h.dispatch_reset(&descriptor))
    }

    /// Re-navigate to the current route with its existing params, forcing
    /// a remount.
    pub fn reload_current_screen(&self) -> bool {
        let Some(current) = self.handle.get().and_then(|h| h.current_route()) else {
            tracing::debug!("reload skipped: no current route");
            return false;
        };
        self.handle.try_call("reload_screen", |h| {
            h.navigate(&current.name, current.params.as_ref())
        })
    }
}

fn log_navigation_error(error: &HandleError, context: &ErrorContext) {
    tracing::error!(
        component = %context.component_name,
        route = context.route_name.as_deref().unwrap_or("<unknown>"),
        current_route = context.current_route.as_deref().unwrap_or("<unknown>"),
        retry_count = context.retry_count,
        error = %error,
        "navigation error"
    );
}

fn log_auth_error(error: &HandleError, context: &ErrorContext) {
    tracing::error!(
        component = %context.component_name,
        current_route = context.current_route.as_deref().unwrap_or("<unknown>"),
        error = %error,
        "authentication error"
    );
}

fn log_network_error(error: &HandleError, context: &ErrorContext) {
    tracing::warn!(
        component = %context.component_name,
        current_route = context.current_route.as_deref().unwrap_or("<unknown>"),
        error = %error,
        "network error"
    );
}
