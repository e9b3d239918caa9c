//! The provider loop: subscription notifications in, sessions out.

use crate::backend::{Database, ListBackend, SubscriptionEvent, SubscriptionFeed};
use crate::config::ProviderConfig;
use crate::errors::ProviderError;
use crate::registry::{SessionSummary, SubscriptionRegistry};
use crate::session::{SessionContext, SessionEvent};
use futures::StreamExt;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Read-only view of the registry that stays valid while [`Provider::run`] owns it.
#[derive(Debug, Clone, Default)]
pub struct ProviderStatus {
    sessions: Arc<RwLock<Vec<SessionSummary>>>,
}

impl ProviderStatus {
    pub fn sessions(&self) -> Vec<SessionSummary> {
        self.sessions.read().clone()
    }

    pub fn session(&self, name: &str) -> Option<SessionSummary> {
        self.sessions.read().iter().find(|s| s.name == name).cloned()
    }

    fn publish(&self, registry: &SubscriptionRegistry) {
        *self.sessions.write() = registry.summaries();
    }
}

pub struct Provider {
    config: ProviderConfig,
    lists: Arc<dyn ListBackend>,
    registry: SubscriptionRegistry,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    status: ProviderStatus,
}

impl Provider {
    pub fn new(
        config: ProviderConfig,
        database: Arc<dyn Database>,
        lists: Arc<dyn ListBackend>,
    ) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let ctx = SessionContext {
            database,
            lists: Arc::clone(&lists),
            primary_key: config.primary_key.clone(),
            events: tx,
        };
        Self {
            config,
            lists,
            registry: SubscriptionRegistry::new(ctx),
            events,
            status: ProviderStatus::default(),
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn status(&self) -> ProviderStatus {
        self.status.clone()
    }

    /// Serves subscriptions until `shutdown` fires or the subscription feed ends, then
    /// closes every session.
    ///
    /// # Errors
    /// Fails if the listen call is rejected or the registry reports a broken invariant.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ProviderError> {
        let feed = self.listen().await?;
        self.serve(feed, shutdown).await
    }

    /// Starts listening, then serves on a spawned task. Subscriptions made after this
    /// returns are guaranteed to be seen.
    ///
    /// # Errors
    /// Fails if the listen call is rejected.
    pub async fn spawn(
        self,
        shutdown: CancellationToken,
    ) -> Result<JoinHandle<Result<(), ProviderError>>, ProviderError> {
        let feed = self.listen().await?;
        Ok(tokio::spawn(self.serve(feed, shutdown)))
    }

    async fn listen(&self) -> Result<SubscriptionFeed, ProviderError> {
        let pattern = self.config.listen_pattern();
        let feed = self.lists.listen(&pattern).await?;
        log::info!("listening for subscriptions matching {pattern}");
        Ok(feed)
    }

    async fn serve(
        mut self,
        mut feed: SubscriptionFeed,
        shutdown: CancellationToken,
    ) -> Result<(), ProviderError> {
        let result = loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    log::info!("shutdown requested");
                    break Ok(());
                }
                Some(event) = self.events.recv() => match event {
                    SessionEvent::Detached { name, session_id } => {
                        self.registry.on_session_detached(&name, session_id).await;
                    }
                },
                next = feed.next() => match next {
                    Some(SubscriptionEvent { name, subscribed }) => {
                        if let Err(e) = self.registry.on_subscription_event(&name, subscribed).await {
                            log::error!("{e}");
                            break Err(e);
                        }
                    }
                    None => {
                        log::info!("subscription feed ended");
                        break Ok(());
                    }
                },
            }
            self.status.publish(&self.registry);
        };

        self.registry.close_all().await;
        self.status.publish(&self.registry);
        result
    }
}
