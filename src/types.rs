//! Core identifiers and state enums shared by the runtime boundary and the watchdog.

use std::fmt;
use std::sync::Arc;

/// Identifier of a managed route.
///
/// Assigned by the route runtime when the route is registered and never
/// changed afterwards. Backed by `Arc<str>` so the activity hot path can clone
/// it without allocating.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteId(Arc<str>);

impl RouteId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RouteId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RouteId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl std::borrow::Borrow<str> for RouteId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Status of a route as reported by the route runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteStatus {
    Starting,
    Started,
    Stopping,
    Stopped,
    Suspended,
}

impl RouteStatus {
    pub fn is_started(self) -> bool {
        matches!(self, RouteStatus::Started)
    }
}

impl fmt::Display for RouteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteStatus::Starting => write!(f, "STARTING"),
            RouteStatus::Started => write!(f, "STARTED"),
            RouteStatus::Stopping => write!(f, "STOPPING"),
            RouteStatus::Stopped => write!(f, "STOPPED"),
            RouteStatus::Suspended => write!(f, "SUSPENDED"),
        }
    }
}

/// Lifecycle state of a restart policy.
///
/// Restart commands are only carried out while the policy is `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
    Stopping,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Stopped => write!(f, "stopped"),
            RunState::Running => write!(f, "running"),
            RunState::Stopping => write!(f, "stopping"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn route_id_compares_by_content() {
        let a = RouteId::from("TestRoute");
        let b = RouteId::from(String::from("TestRoute"));
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains("TestRoute"));
    }

    #[test]
    fn only_started_counts_as_started() {
        assert!(RouteStatus::Started.is_started());
        for status in [
            RouteStatus::Starting,
            RouteStatus::Stopping,
            RouteStatus::Stopped,
            RouteStatus::Suspended,
        ] {
            assert!(!status.is_started(), "{status} should not count as started");
        }
    }
}
