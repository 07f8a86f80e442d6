use tracing::info;

/// Moves the application to a route, e.g. the login entry point once the
/// session cannot be recovered.
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: &str);
}

/// Navigator for headless use; it records the request in the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate(&self, route: &str) {
        info!(route, "Navigation requested");
    }
}
