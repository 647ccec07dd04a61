//! # Engine Wiring
//!
//! Builds the shared components (registry, repositories, scorer, aggregator,
//! scheduler and discovery poller) from an [`AppConfig`] and drives their
//! lifecycle as one unit.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::adapters::{ProviderRegistry, build_registry};
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::db;
use crate::discovery::DiscoveryPoller;
use crate::enrichment::EnrichmentAggregator;
use crate::error::{DiscoveryError, SchedulerError};
use crate::repositories::{
    OrganizationRepository, ScheduleStore, SeaOrmOrganizationRepository, SeaOrmScheduleStore,
};
use crate::scheduler::SyncScheduler;
use crate::scoring::LeadScorer;

/// Shared components of a running engine.
#[derive(Clone)]
pub struct Engine {
    pub config: Arc<AppConfig>,
    pub registry: Arc<ProviderRegistry>,
    pub repository: Arc<dyn OrganizationRepository>,
    pub scorer: Arc<LeadScorer>,
    pub aggregator: Arc<EnrichmentAggregator>,
    pub scheduler: SyncScheduler,
    pub poller: DiscoveryPoller,
}

impl Engine {
    /// Wire the engine from already-built parts.
    pub fn assemble(
        config: Arc<AppConfig>,
        registry: Arc<ProviderRegistry>,
        repository: Arc<dyn OrganizationRepository>,
        store: Arc<dyn ScheduleStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let scorer = Arc::new(LeadScorer::new(config.scoring.clone(), clock));
        let aggregator = Arc::new(EnrichmentAggregator::new(
            Arc::clone(&registry),
            Arc::clone(&scorer),
        ));
        let scheduler = SyncScheduler::new(
            Arc::clone(&config),
            Arc::clone(&registry),
            Arc::clone(&repository),
            store,
            Arc::clone(&scorer),
        );
        let poller = DiscoveryPoller::new(
            Arc::clone(&config),
            Arc::clone(&registry),
            Arc::clone(&aggregator),
            Arc::clone(&repository),
        );

        Self {
            config,
            registry,
            repository,
            scorer,
            aggregator,
            scheduler,
            poller,
        }
    }

    /// Connect to the configured database, run migrations and build
    /// adapters from the `providers` configuration.
    pub async fn connect(config: AppConfig) -> anyhow::Result<Self> {
        let db = db::init_pool(&config)
            .await
            .context("failed to connect to database")?;
        db::run_migrations(&db)
            .await
            .context("failed to run database migrations")?;
        db::health_check(&db).await?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let db = Arc::new(db);
        let repository = Arc::new(SeaOrmOrganizationRepository::new(
            Arc::clone(&db),
            Arc::clone(&clock),
        ));
        let store = Arc::new(SeaOrmScheduleStore::new(db, Arc::clone(&clock)));
        let registry = Arc::new(build_registry(&config, Arc::clone(&clock)));

        Ok(Self::assemble(
            Arc::new(config),
            registry,
            repository,
            store,
            clock,
        ))
    }

    /// Resume persisted schedules, activate sync for registered providers
    /// that have no schedule yet (unless configured with `sync=false`) and
    /// start the discovery poller. Returns the number of active schedules.
    pub async fn start(&self) -> Result<usize, SchedulerError> {
        self.scheduler.restore().await?;

        for metadata in self.registry.list_metadata() {
            if self.scheduler.get_sync_status(&metadata.id).is_some() {
                continue;
            }
            let wants_sync = self
                .config
                .providers
                .get(&metadata.id)
                .and_then(|credentials| credentials.parse::<bool>("sync"))
                .unwrap_or(true);
            if wants_sync {
                self.scheduler.set_sync_enabled(&metadata.id, true).await?;
            }
        }

        match self.poller.start() {
            Ok(()) => {}
            Err(DiscoveryError::Disabled) => info!("discovery poller disabled"),
            Err(DiscoveryError::AlreadyRunning) => warn!("discovery poller already running"),
        }

        let active = self
            .scheduler
            .list_schedules()
            .iter()
            .filter(|schedule| schedule.is_active)
            .count();
        info!(active_schedules = active, "engine started");
        Ok(active)
    }

    /// Stop timers and the discovery loop. In-progress work finishes.
    pub async fn stop(&self) {
        self.scheduler.shutdown();
        self.poller.stop().await;
        info!("engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ProviderKind, ProviderMetadata, ScriptedAdapter};
    use crate::clock::ManualClock;
    use crate::config::ProviderCredentials;
    use crate::models::SyncSchedule;
    use crate::repositories::{InMemoryOrganizationRepository, InMemoryScheduleStore};
    use chrono::Utc;

    fn engine(config: AppConfig, store: Arc<InMemoryScheduleStore>) -> Engine {
        let registry = Arc::new(ProviderRegistry::new());
        for (id, kind) in [("crm", ProviderKind::Crm), ("web", ProviderKind::Analytics)] {
            registry.register(
                Arc::new(ScriptedAdapter::new(id, kind)),
                ProviderMetadata::new(id, kind),
            );
        }
        Engine::assemble(
            Arc::new(config),
            registry,
            Arc::new(InMemoryOrganizationRepository::new()),
            store,
            Arc::new(ManualClock::new(Utc::now())),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn start_activates_unscheduled_providers() {
        let mut config = AppConfig::default();
        config.discovery.enabled = false;
        config
            .providers
            .insert("web".into(), ProviderCredentials::new().with("sync", "false"));
        let store = Arc::new(InMemoryScheduleStore::new());
        let engine = engine(config, Arc::clone(&store));

        assert_eq!(engine.start().await.unwrap(), 1);
        assert!(engine.scheduler.has_timer("crm"));
        assert!(!engine.scheduler.has_timer("web"));
        assert!(store.get("crm").unwrap().is_active);
        assert!(!engine.poller.is_running());

        engine.stop().await;
        assert!(!engine.scheduler.has_timer("crm"));
    }

    #[tokio::test(start_paused = true)]
    async fn persisted_inactive_schedule_is_left_alone() {
        let mut config = AppConfig::default();
        config.discovery.enabled = false;
        let store = Arc::new(InMemoryScheduleStore::with_schedules([
            SyncSchedule::inactive("crm", 30),
        ]));
        let engine = engine(config, store);

        assert_eq!(engine.start().await.unwrap(), 1);
        assert!(!engine.scheduler.has_timer("crm"));
        assert!(engine.scheduler.has_timer("web"));
        engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_launches_discovery_when_enabled() {
        let engine = engine(AppConfig::default(), Arc::new(InMemoryScheduleStore::new()));
        engine.start().await.unwrap();
        assert!(engine.poller.is_running());
        engine.stop().await;
        assert!(!engine.poller.is_running());
    }
}
