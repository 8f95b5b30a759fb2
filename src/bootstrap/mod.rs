use log::{info, warn};
use std::path::Path;
use std::sync::Arc;

use crate::cache::{CacheError, CacheStore, InMemoryCacheStore, TicketCache};
use crate::core::config::{ConfigError, HelpdeskConfig};
use crate::notifications::{InAppNotifier, NotificationRouter, Notifier};
use crate::realtime::BroadcastHub;
use crate::tickets::{
    HelpdeskError, InMemoryTicketStore, SideEffectDispatcher, TicketService, TicketStore,
};

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Storage(#[from] HelpdeskError),
}

/// Installs the global `env_logger` with an `info` default filter.
/// Returns `false` when a logger was already installed.
pub fn init_logging() -> bool {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .write_style(env_logger::WriteStyle::Always)
        .try_init()
        .is_ok()
}

/// Process-wide services, built once at startup.
pub struct Helpdesk {
    pub config: HelpdeskConfig,
    pub tickets: TicketService,
    pub cache: TicketCache,
    pub hub: Arc<BroadcastHub>,
}

impl Helpdesk {
    pub fn builder(config: HelpdeskConfig) -> HelpdeskBuilder {
        HelpdeskBuilder::new(config)
    }

    /// Loads configuration from `path` and the environment, then wires the
    /// default backends.
    pub fn load(path: Option<&Path>) -> Result<Self, BootstrapError> {
        let config = HelpdeskConfig::load(path)?;
        HelpdeskBuilder::new(config).build()
    }
}

pub struct HelpdeskBuilder {
    config: HelpdeskConfig,
    store: Option<Arc<dyn TicketStore>>,
    cache_store: Option<Arc<dyn CacheStore>>,
    notifiers: Vec<Arc<dyn Notifier>>,
    spawn_side_effects: bool,
}

impl HelpdeskBuilder {
    pub fn new(config: HelpdeskConfig) -> Self {
        Self {
            config,
            store: None,
            cache_store: None,
            notifiers: Vec::new(),
            spawn_side_effects: true,
        }
    }

    pub fn store(mut self, store: Arc<dyn TicketStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    /// Adds a delivery channel next to the built-in in-app notifier.
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    #[cfg(feature = "mail")]
    pub fn mail_directory(self, directory: Arc<dyn crate::notifications::MailDirectory>) -> Self {
        let smtp = crate::notifications::SmtpNotifier::new(self.config.mail.clone(), directory);
        self.notifier(Arc::new(smtp))
    }

    /// Deliver notifications and broadcasts before the mutating call returns.
    pub fn inline_side_effects(mut self) -> Self {
        self.spawn_side_effects = false;
        self
    }

    fn default_cache_store(config: &HelpdeskConfig) -> Result<Arc<dyn CacheStore>, CacheError> {
        match config.cache.redis_url.as_deref() {
            #[cfg(feature = "cache")]
            Some(url) => {
                info!("Using Redis cache at {}", url);
                Ok(Arc::new(
                    crate::cache::RedisCacheStore::from_url(url)?.with_prefix("helpdesk:"),
                ))
            }
            #[cfg(not(feature = "cache"))]
            Some(_) => {
                warn!("cache.redis_url is set but the cache feature is disabled, using memory");
                Ok(Arc::new(InMemoryCacheStore::new()))
            }
            None => Ok(Arc::new(InMemoryCacheStore::new())),
        }
    }

    fn default_store(config: &HelpdeskConfig) -> Result<Arc<dyn TicketStore>, HelpdeskError> {
        match config.database.url.as_deref() {
            #[cfg(feature = "postgres")]
            Some(_) => {
                info!("Using PostgreSQL ticket store");
                Ok(Arc::new(crate::tickets::PgTicketStore::connect(&config.database)?))
            }
            #[cfg(not(feature = "postgres"))]
            Some(_) => {
                warn!("database.url is set but the postgres feature is disabled, using memory");
                Ok(Arc::new(InMemoryTicketStore::new()))
            }
            None => {
                warn!("No database configured, tickets are kept in memory");
                Ok(Arc::new(InMemoryTicketStore::new()))
            }
        }
    }

    pub fn build(self) -> Result<Helpdesk, BootstrapError> {
        let config = self.config;

        let cache_store = match self.cache_store {
            Some(store) => store,
            None => Self::default_cache_store(&config)?,
        };
        let cache = TicketCache::new(cache_store, config.cache.ttl());

        let store = match self.store {
            Some(store) => store,
            None => Self::default_store(&config)?,
        };

        let hub = Arc::new(BroadcastHub::new(config.realtime.channel_capacity));

        let mut router = NotificationRouter::new().with(Arc::new(InAppNotifier::new(
            hub.clone(),
            config.mail.app_url.clone(),
        )));
        for notifier in self.notifiers {
            router = router.with(notifier);
        }

        let mut dispatcher = SideEffectDispatcher::new(Arc::new(router), hub.clone());
        if !self.spawn_side_effects {
            dispatcher = dispatcher.inline();
        }

        let tickets = TicketService::new(store, cache.clone(), config.tickets.clone())
            .with_dispatcher(dispatcher);

        info!(
            "Helpdesk ready (page size {}, cache ttl {}s)",
            config.tickets.page_size, config.cache.ttl_seconds
        );

        Ok(Helpdesk {
            config,
            tickets,
            cache,
            hub,
        })
    }
}
