//! Set of routes watched by one policy.

use dashmap::DashSet;

use crate::types::RouteId;

/// Routes registered with a policy. Grows only; routes are not removed when
/// they stop.
#[derive(Debug, Default)]
pub struct RouteRegistry {
    routes: DashSet<RouteId>,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the route was not registered before.
    pub fn register(&self, route: &RouteId) -> bool {
        if self.routes.contains(route) {
            return false;
        }
        self.routes.insert(route.clone())
    }

    pub fn contains(&self, route: &RouteId) -> bool {
        self.routes.contains(route)
    }

    /// Point-in-time copy of the registered routes, sorted by id so every
    /// cycle visits them in the same order.
    pub fn snapshot(&self) -> Vec<RouteId> {
        let mut routes: Vec<RouteId> = self.routes.iter().map(|r| r.key().clone()).collect();
        routes.sort();
        routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
