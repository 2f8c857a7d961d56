//! Shared wiring for the pipeline services.

use std::sync::Arc;

use tokio::sync::watch;

use crate::cache::RenderCache;
use crate::config::Settings;
use crate::infra::error::InfraError;

use super::render::{RenderClient, RenderScheduler, ServerMonitor};

/// The server base URL every consumer renders against, switchable at
/// runtime between the remote service and a locally managed instance.
///
/// Consumers hold a [`watch::Receiver`] and pick up a switch on their next
/// operation; nothing is restarted when the endpoint changes.
pub struct ServerEndpoint {
    tx: watch::Sender<String>,
    remote: String,
}

impl ServerEndpoint {
    pub fn new(remote: String) -> Self {
        let (tx, _) = watch::channel(remote.clone());
        Self { tx, remote }
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> String {
        self.tx.borrow().clone()
    }

    /// Point consumers at a locally managed server.
    pub fn use_embedded(&self, url: String) {
        self.tx.send_replace(url);
    }

    /// Point consumers back at the configured remote server.
    pub fn use_remote(&self) {
        self.tx.send_replace(self.remote.clone());
    }
}

/// Everything a command path needs, built once from resolved settings.
pub struct AppContext {
    pub settings: Settings,
    pub cache: Arc<RenderCache>,
    pub client: Arc<RenderClient>,
    pub endpoint: ServerEndpoint,
    pub monitor: Arc<ServerMonitor<RenderClient>>,
}

impl AppContext {
    pub fn new(settings: Settings) -> Result<Self, InfraError> {
        let cache = Arc::new(RenderCache::open(
            settings.cache.max_entries,
            settings.cache.path.clone(),
        ));
        let client = Arc::new(RenderClient::new(&settings.render, Arc::clone(&cache))?);
        let endpoint = ServerEndpoint::new(settings.server.base_url.clone());
        let monitor = Arc::new(ServerMonitor::new(
            Arc::clone(&client),
            endpoint.subscribe(),
        ));

        Ok(Self {
            settings,
            cache,
            client,
            endpoint,
            monitor,
        })
    }

    /// Spawn a scheduler bound to this context's client, cache, and
    /// endpoint.
    pub fn scheduler(&self) -> RenderScheduler {
        RenderScheduler::spawn(
            Arc::clone(&self.client),
            Arc::clone(&self.cache),
            self.endpoint.subscribe(),
            self.settings.render.debounce,
            self.settings.render.format,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_switch_reaches_subscribers() {
        let endpoint = ServerEndpoint::new("https://www.plantuml.com/plantuml".to_string());
        let rx = endpoint.subscribe();

        endpoint.use_embedded("http://localhost:18123".to_string());
        assert_eq!(rx.borrow().as_str(), "http://localhost:18123");
        assert_eq!(endpoint.current(), "http://localhost:18123");

        endpoint.use_remote();
        assert_eq!(rx.borrow().as_str(), "https://www.plantuml.com/plantuml");
    }
}
