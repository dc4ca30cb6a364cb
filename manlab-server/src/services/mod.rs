//! Service container: explicit constructor wiring of every component.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::jwt::JwtService;
use crate::api::server::AppState;
use crate::audit::AuditQueue;
use crate::config::ServerConfig;
use crate::crypto::SecretSealer;
use crate::database::DbPool;
use crate::database::repositories::{
    AuditRepository, CommandQueueRepository, NodeRepository, OnboardingRepository,
    PolicyRepository, ScriptRepository, SettingsRepository, SqlxAuditRepository,
    SqlxCommandQueueRepository, SqlxNodeRepository, SqlxOnboardingRepository,
    SqlxPolicyRepository, SqlxScriptRepository, SqlxSettingsRepository,
    SqlxSystemUpdateRepository, SqlxTerminalSessionRepository, SystemUpdateRepository,
    TerminalSessionRepository,
};
use crate::dispatch::{CompletionWaiter, Dispatcher};
use crate::hub::{AgentHub, ConnectionMap};
use crate::monitor::HealthMonitor;
use crate::notification::{
    DiscordChannel, DiscordConfig, EventBroadcaster, NotificationChannel, NotificationService,
};
use crate::registry::ConnectionRegistry;
use crate::scheduler::{
    AGENT_UPDATE_SCHEDULE, AgentUpdateJob, JobHandle, ReleaseCatalog, ReleaseCatalogConfig,
    SYSTEM_UPDATE_SCHEDULE, SshCollaborator, SystemUpdateJob, UnconfiguredSsh,
};
use crate::sessions::{SessionCleanupWorker, SessionService};
use crate::streaming::{DownloadCoordinator, StreamRouter, StreamingConfig};
use crate::Result;

/// Holds the wired application plus its shutdown token.
pub struct ServiceContainer {
    pub state: AppState,
    cancel_token: CancellationToken,
    system_update_job_handle: Arc<JobHandle>,
    agent_update_job_handle: Arc<JobHandle>,
    sessions: Arc<SessionService>,
    dispatcher: Arc<Dispatcher>,
    monitor: Arc<HealthMonitor>,
}

impl ServiceContainer {
    /// Wire every component against the given pool and config.
    pub fn new(pool: DbPool, config: &ServerConfig) -> Result<Self> {
        let cancel_token = CancellationToken::new();

        // Repositories.
        let nodes: Arc<dyn NodeRepository> = Arc::new(SqlxNodeRepository::new(pool.clone()));
        let commands: Arc<dyn CommandQueueRepository> =
            Arc::new(SqlxCommandQueueRepository::new(pool.clone()));
        let policies: Arc<dyn PolicyRepository> = Arc::new(SqlxPolicyRepository::new(pool.clone()));
        let scripts: Arc<dyn ScriptRepository> = Arc::new(SqlxScriptRepository::new(pool.clone()));
        let settings: Arc<dyn SettingsRepository> =
            Arc::new(SqlxSettingsRepository::new(pool.clone()));
        let updates: Arc<dyn SystemUpdateRepository> =
            Arc::new(SqlxSystemUpdateRepository::new(pool.clone()));
        let onboarding: Arc<dyn OnboardingRepository> =
            Arc::new(SqlxOnboardingRepository::new(pool.clone()));
        let terminals: Arc<dyn TerminalSessionRepository> =
            Arc::new(SqlxTerminalSessionRepository::new(pool.clone()));
        let audit_repo: Arc<dyn AuditRepository> = Arc::new(SqlxAuditRepository::new(pool.clone()));

        // Cross-cutting services.
        let audit = AuditQueue::start(Arc::clone(&audit_repo), cancel_token.clone());
        let broadcaster = EventBroadcaster::new();
        let notifications = Arc::new(build_notifications());

        // Core plumbing.
        let registry = Arc::new(ConnectionRegistry::new());
        let connections = Arc::new(ConnectionMap::new());
        let streams = Arc::new(StreamRouter::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&connections),
            Arc::clone(&commands),
        ));
        let waiter = Arc::new(CompletionWaiter::new(Arc::clone(&commands)));

        let hub = Arc::new(AgentHub::new(
            Arc::clone(&registry),
            Arc::clone(&connections),
            Arc::clone(&dispatcher),
            Arc::clone(&streams),
            Arc::clone(&nodes),
            Arc::clone(&commands),
            Arc::clone(&scripts),
            Arc::clone(&onboarding),
            Arc::clone(&settings),
            broadcaster.clone(),
            Arc::clone(&notifications),
            audit.clone(),
        ));

        let sessions = Arc::new(SessionService::new(
            Arc::clone(&nodes),
            Arc::clone(&settings),
            Arc::clone(&policies),
            Arc::clone(&terminals),
        ));

        let downloads = Arc::new(DownloadCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&dispatcher),
            Arc::clone(&commands),
            Arc::clone(&streams),
            broadcaster.clone(),
            audit.clone(),
            StreamingConfig::default(),
        ));

        // Control loops.
        let monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&nodes),
            broadcaster.clone(),
            Arc::clone(&notifications),
            audit.clone(),
        ));

        let ssh: Arc<dyn SshCollaborator> = Arc::new(UnconfiguredSsh);
        let catalog = Arc::new(ReleaseCatalog::new(ReleaseCatalogConfig {
            local_versions: Vec::new(),
            github_repo: std::env::var("MANLAB_AGENT_RELEASE_REPO").ok(),
        }));

        let agent_update_job = Arc::new(AgentUpdateJob::new(
            Arc::clone(&nodes),
            Arc::clone(&settings),
            catalog,
            Arc::clone(&ssh),
            broadcaster.clone(),
            Arc::clone(&notifications),
            audit.clone(),
        ));
        let agent_update_job_handle = JobHandle::new(agent_update_job);

        let system_update_exec = Arc::new(SystemUpdateJob::new(
            Arc::clone(&nodes),
            Arc::clone(&settings),
            Arc::clone(&updates),
            Arc::clone(&ssh),
            broadcaster.clone(),
            Arc::clone(&notifications),
            audit.clone(),
        ));
        let system_update_job_handle = JobHandle::new(Arc::clone(&system_update_exec) as Arc<dyn crate::scheduler::ScheduledJob>);

        let jwt_service = config
            .jwt_secret
            .as_deref()
            .map(|secret| Arc::new(JwtService::new(secret, "manlab", "manlab-dashboard", None)));

        let sealer = match config.settings_key.as_deref() {
            Some(key) => Some(Arc::new(SecretSealer::from_base64(key)?)),
            None => None,
        };

        let state = AppState {
            start_time: Instant::now(),
            jwt_service,
            nodes,
            commands,
            policies,
            scripts,
            settings,
            updates,
            onboarding,
            audit_repo,
            registry,
            hub,
            dispatcher: Arc::clone(&dispatcher),
            waiter,
            sessions: Arc::clone(&sessions),
            downloads,
            broadcaster,
            audit,
            agent_update_job: Arc::clone(&agent_update_job_handle),
            system_update_job: Arc::clone(&system_update_job_handle),
            system_update_exec,
            sealer,
        };

        Ok(Self {
            state,
            cancel_token,
            system_update_job_handle,
            agent_update_job_handle,
            sessions,
            dispatcher,
            monitor,
        })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Start the background workers: health monitor, session cleanup, and
    /// the two cron loops.
    pub fn start_workers(&self) -> Result<()> {
        Arc::clone(&self.monitor).start(self.cancel_token.clone());

        self.dispatcher
            .start_redispatch_loop(std::time::Duration::from_secs(5), self.cancel_token.clone());

        SessionCleanupWorker::new(Arc::clone(&self.sessions), Arc::clone(&self.dispatcher))
            .start(self.cancel_token.clone());

        self.agent_update_job_handle
            .start_cron(AGENT_UPDATE_SCHEDULE, self.cancel_token.clone())?;
        self.system_update_job_handle
            .start_cron(SYSTEM_UPDATE_SCHEDULE, self.cancel_token.clone())?;

        info!("Background workers started");
        Ok(())
    }

    /// Cancel all workers and in-flight streams.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

fn build_notifications() -> NotificationService {
    let mut channels: Vec<Arc<dyn NotificationChannel>> = Vec::new();
    if let Ok(webhook_url) = std::env::var("MANLAB_DISCORD_WEBHOOK")
        && !webhook_url.trim().is_empty()
    {
        channels.push(Arc::new(DiscordChannel::new(DiscordConfig {
            enabled: true,
            webhook_url,
            ..DiscordConfig::default()
        })));
    }
    NotificationService::new(channels)
}
