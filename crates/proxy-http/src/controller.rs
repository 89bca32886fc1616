use axum::Router;

/// Implemented by each HTTP-facing module; mounts its own routes onto a
/// router that is shared (and already carries the process' `AppState`).
pub trait Controller<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn register(&self, router: Router<S>) -> Router<S>;
}

/// Folds a list of controllers onto `router` in order. Controllers that
/// need their own path prefix or middleware build that into the sub-router
/// they return from `register` (via `Router::nest` / `route_layer`) before
/// handing it back.
pub fn mount_all<S>(router: Router<S>, controllers: &[&dyn Controller<S>]) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    controllers.iter().fold(router, |r, c| c.register(r))
}
