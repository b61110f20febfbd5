//! Navigation stack snapshot model: cleaning raw runtime state into a
//! storable form, and validating it before it is ever restored.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

/// Nested `history` arrays inside route params are capped to this many of
/// their most recent entries before persisting.
pub const MAX_PARAM_HISTORY: usize = 5;

/// Cleaned, storable representation of a navigation stack.
///
/// A snapshot is only considered usable after passing
/// [`validate_navigation_state`]; consumers must never dispatch a reset to
/// a snapshot that fails validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationSnapshot {
    pub index: usize,
    pub routes: Vec<RouteEntry>,
    /// Known route names at capture time. Informational only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub route_names: Vec<String>,
    /// Navigator type tag ("stack", "tab", ...). Informational only.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub stack_type: Option<String>,
}

/// One entry in a navigation stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub name: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
    /// Nested navigator state, if this route hosts its own stack.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Box<NavigationSnapshot>>,
}

impl RouteEntry {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            params: None,
            state: None,
        }
    }
}

/// Structural validity check applied before any snapshot is restored.
///
/// A snapshot is valid iff it has at least one route, its `index` points
/// inside the route list, every route carries a non-empty `name` and
/// `key`, and any nested state is itself valid.
pub fn validate_navigation_state(snapshot: &NavigationSnapshot) -> bool {
    if snapshot.routes.is_empty() || snapshot.index >= snapshot.routes.len() {
        return false;
    }
    snapshot.routes.iter().all(|route| {
        !route.name.is_empty()
            && !route.key.is_empty()
            && route
                .state
                .as_deref()
                .map(validate_navigation_state)
                .unwrap_or(true)
    })
}

/// Clean a raw navigation-state value into a storable snapshot.
///
/// Returns `None` when the value carries no route array at all (not
/// minimally savable). The result may still fail
/// [`validate_navigation_state`]; cleaning and validation are separate
/// steps so callers can distinguish "nothing to save" from "corrupt".
pub fn clean_navigation_state(raw: &Value) -> Option<NavigationSnapshot> {
    let obj = raw.as_object()?;
    let routes = obj.get("routes")?.as_array()?;

    let cleaned: Vec<RouteEntry> = routes.iter().filter_map(clean_route).collect();

    let index = obj.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
    let route_names = obj
        .get("routeNames")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let stack_type = obj
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string);

    Some(NavigationSnapshot {
        index,
        routes: cleaned,
        route_names,
        stack_type,
    })
}

fn clean_route(raw: &Value) -> Option<RouteEntry> {
    let obj = raw.as_object()?;
    let name = obj.get("name").and_then(Value::as_str)?.to_string();
    let key = obj
        .get("key")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let params = obj.get("params").and_then(Value::as_object).map(clean_params);
    let state = obj
        .get("state")
        .and_then(clean_navigation_state)
        .map(Box::new);

    Some(RouteEntry {
        name,
        key,
        params,
        state,
    })
}

/// Sanitize route params for persistence: drop null entries and cap any
/// `history` array to its [`MAX_PARAM_HISTORY`] most recent entries.
fn clean_params(params: &Map<String, Value>) -> Map<String, Value> {
    params
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(name, value)| {
            let value = match value {
                Value::Array(entries) if name.as_str() == "history" => {
                    let skip = entries.len().saturating_sub(MAX_PARAM_HISTORY);
                    Value::Array(entries.iter().skip(skip).cloned().collect())
                }
                other => other.clone(),
            };
            (name.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn snapshot(routes: Vec<RouteEntry>, index: usize) -> NavigationSnapshot {
        NavigationSnapshot {
            index,
            routes,
            route_names: Vec::new(),
            stack_type: None,
        }
    }

    #[test]
    fn rejects_empty_routes() {
        assert!(!validate_navigation_state(&snapshot(Vec::new(), 0)));
    }

    #[test]
    fn rejects_out_of_range_index() {
        let snap = snapshot(vec![RouteEntry::new("Home", "home-1")], 1);
        assert!(!validate_navigation_state(&snap));
    }

    #[test]
    fn rejects_empty_name_or_key() {
        let snap = snapshot(vec![RouteEntry::new("", "home-1")], 0);
        assert!(!validate_navigation_state(&snap));

        let snap = snapshot(vec![RouteEntry::new("Home", "")], 0);
        assert!(!validate_navigation_state(&snap));
    }

    #[test]
    fn accepts_minimal_valid_snapshot() {
        let snap = snapshot(vec![RouteEntry::new("A", "k")], 0);
        assert!(validate_navigation_state(&snap));
    }

    #[test]
    fn rejects_invalid_nested_state() {
        let mut route = RouteEntry::new("Journeys", "journeys-1");
        route.state = Some(Box::new(snapshot(Vec::new(), 0)));
        assert!(!validate_navigation_state(&snapshot(vec![route], 0)));
    }

    #[test]
    fn clean_returns_none_without_routes() {
        assert_eq!(None, clean_navigation_state(&json!({"index": 0})));
        assert_eq!(None, clean_navigation_state(&json!("not an object")));
    }

    #[test]
    fn clean_preserves_names_keys_and_index() {
        let raw = json!({
            "index": 1,
            "routes": [
                {"name": "Home", "key": "home-1"},
                {"name": "Map", "key": "map-1", "params": {"zoom": 12}},
            ],
            "routeNames": ["Home", "Map"],
            "type": "stack",
        });

        let snap = clean_navigation_state(&raw).unwrap();
        assert_eq!(1, snap.index);
        assert_eq!(2, snap.routes.len());
        assert_eq!("Map", snap.routes[1].name);
        assert_eq!("map-1", snap.routes[1].key);
        assert_eq!(vec!["Home".to_string(), "Map".to_string()], snap.route_names);
        assert!(validate_navigation_state(&snap));
    }

    #[test]
    fn clean_drops_null_params_and_caps_history() {
        let raw = json!({
            "index": 0,
            "routes": [{
                "name": "Journey",
                "key": "journey-1",
                "params": {
                    "segment": "s-4",
                    "draft": null,
                    "history": [1, 2, 3, 4, 5, 6, 7],
                },
            }],
        });

        let snap = clean_navigation_state(&raw).unwrap();
        let params = snap.routes[0].params.as_ref().unwrap();
        assert!(!params.contains_key("draft"));
        assert_eq!(json!([3, 4, 5, 6, 7]), params["history"]);
    }

    #[test]
    fn clean_recurses_into_nested_state() {
        let raw = json!({
            "index": 0,
            "routes": [{
                "name": "Tabs",
                "key": "tabs-1",
                "state": {
                    "index": 0,
                    "routes": [{"name": "Feed", "key": "feed-1"}],
                },
            }],
        });

        let snap = clean_navigation_state(&raw).unwrap();
        let nested = snap.routes[0].state.as_deref().unwrap();
        assert_eq!("Feed", nested.routes[0].name);
    }

    #[test]
    fn snapshot_serde_round_trip() {
        let snap = snapshot(
            vec![RouteEntry::new("Home", "home-1"), RouteEntry::new("Map", "map-1")],
            1,
        );
        let encoded = serde_json::to_string(&snap).unwrap();
        let decoded: NavigationSnapshot = serde_json::from_str(&encoded).unwrap();
        assert_eq!(snap, decoded);
    }
}
