//! Engine configuration: route table and dependency graph.
//!
//! Both are built once at startup and injected into the engine; nothing here
//! mutates at runtime. The defaults reproduce the project-management
//! backend's REST surface, but every route and edge can be overridden for
//! other deployments.

use std::collections::HashMap;

use crate::models::graph::DependencyGraph;
use crate::models::{CollectionKind, OperationKind};
use crate::transport::Method;

/// One endpoint: an HTTP method plus a path template.
///
/// Templates may contain `{scope}` (the collection key's scope) and `{id}`
/// (the target entity's server id) placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub method: Method,
    pub path: String,
}

impl Route {
    /// Create a route from a method and path template.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }

    /// Render the template against a scope and an optional entity id.
    pub fn render(&self, scope: &str, id: Option<&str>) -> String {
        let mut path = self.path.replace("{scope}", scope);
        if let Some(id) = id {
            path = path.replace("{id}", id);
        }
        path
    }
}

/// Stable mapping from `(collection kind, operation)` to an endpoint.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    fetch: HashMap<CollectionKind, Route>,
    mutations: HashMap<(CollectionKind, OperationKind), Route>,
}

impl RouteTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set the fetch endpoint of a kind.
    pub fn with_fetch(mut self, kind: CollectionKind, route: Route) -> Self {
        self.fetch.insert(kind, route);
        self
    }

    /// Builder: set a mutation endpoint of a kind.
    pub fn with_mutation(mut self, kind: CollectionKind, op: OperationKind, route: Route) -> Self {
        self.mutations.insert((kind, op), route);
        self
    }

    /// The fetch endpoint of a kind, if configured.
    pub fn fetch_route(&self, kind: CollectionKind) -> Option<&Route> {
        self.fetch.get(&kind)
    }

    /// The mutation endpoint of a kind and operation, if configured.
    pub fn mutation_route(&self, kind: CollectionKind, op: OperationKind) -> Option<&Route> {
        self.mutations.get(&(kind, op))
    }

    /// The project-management backend's REST surface.
    pub fn project_defaults() -> Self {
        use CollectionKind::*;
        use OperationKind::*;

        Self::new()
            // Chat messages, served ascending by creation time.
            .with_fetch(Messages, Route::new(Method::Get, "/api/messages/chat/{scope}"))
            .with_mutation(Messages, Create, Route::new(Method::Post, "/api/messages/send"))
            .with_mutation(Messages, Update, Route::new(Method::Put, "/api/messages/{id}"))
            .with_mutation(Messages, Delete, Route::new(Method::Delete, "/api/messages/{id}"))
            // Comments, scoped by issue.
            .with_fetch(Comments, Route::new(Method::Get, "/api/comments/{scope}"))
            .with_mutation(Comments, Create, Route::new(Method::Post, "/api/comments"))
            .with_mutation(Comments, Update, Route::new(Method::Put, "/api/comments/{id}"))
            .with_mutation(Comments, Delete, Route::new(Method::Delete, "/api/comments/{id}"))
            // Milestones, scoped by project; aggregates computed server-side.
            .with_fetch(
                Milestones,
                Route::new(Method::Get, "/api/projects/{scope}/milestones"),
            )
            .with_mutation(
                Milestones,
                Create,
                Route::new(Method::Post, "/api/projects/{scope}/milestones"),
            )
            .with_mutation(Milestones, Update, Route::new(Method::Put, "/api/milestones/{id}"))
            .with_mutation(
                Milestones,
                Delete,
                Route::new(Method::Delete, "/api/milestones/{id}"),
            )
            // Tasks (issues), scoped by project.
            .with_fetch(Tasks, Route::new(Method::Get, "/api/issues/project/{scope}"))
            .with_mutation(Tasks, Create, Route::new(Method::Post, "/api/issues"))
            .with_mutation(Tasks, Update, Route::new(Method::Put, "/api/issues/{id}"))
            .with_mutation(Tasks, Delete, Route::new(Method::Delete, "/api/issues/{id}"))
            // Role assignments, scoped by project.
            .with_fetch(Roles, Route::new(Method::Get, "/api/projects/{scope}/roles"))
            .with_mutation(
                Roles,
                Create,
                Route::new(Method::Post, "/api/projects/{scope}/roles"),
            )
            .with_mutation(
                Roles,
                Update,
                Route::new(Method::Put, "/api/projects/{scope}/roles/{id}"),
            )
            .with_mutation(
                Roles,
                Delete,
                Route::new(Method::Delete, "/api/projects/{scope}/roles/{id}"),
            )
            // Project detail (team view); fetch-only invalidation target.
            .with_fetch(Project, Route::new(Method::Get, "/api/projects/{scope}"))
    }
}

/// Startup configuration injected into the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub routes: RouteTable,
    pub graph: DependencyGraph,
}

impl EngineConfig {
    /// Defaults for the project-management domain: the original backend's
    /// endpoints plus the `tasks -> milestones`, `roles -> project` edges.
    pub fn project_defaults() -> Self {
        Self {
            routes: RouteTable::project_defaults(),
            graph: DependencyGraph::project_defaults(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::project_defaults()
    }
}
