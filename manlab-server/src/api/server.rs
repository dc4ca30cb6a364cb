//! API server setup and shared state.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::jwt::JwtService;
use crate::api::routes;
use crate::audit::AuditQueue;
use crate::crypto::SecretSealer;
use crate::database::repositories::{
    AuditRepository, CommandQueueRepository, NodeRepository, OnboardingRepository,
    PolicyRepository, ScriptRepository, SettingsRepository, SystemUpdateRepository,
};
use crate::dispatch::{CompletionWaiter, Dispatcher};
use crate::error::Result;
use crate::hub::AgentHub;
use crate::notification::EventBroadcaster;
use crate::registry::ConnectionRegistry;
use crate::scheduler::{JobHandle, SystemUpdateJob};
use crate::sessions::SessionService;
use crate::streaming::DownloadCoordinator;

/// Shared application state, wired explicitly at boot.
#[derive(Clone)]
pub struct AppState {
    /// Server start time for uptime reporting
    pub start_time: Instant,
    /// JWT validation; None disables dashboard auth (dev/test)
    pub jwt_service: Option<Arc<JwtService>>,
    pub nodes: Arc<dyn NodeRepository>,
    pub commands: Arc<dyn CommandQueueRepository>,
    pub policies: Arc<dyn PolicyRepository>,
    pub scripts: Arc<dyn ScriptRepository>,
    pub settings: Arc<dyn SettingsRepository>,
    pub updates: Arc<dyn SystemUpdateRepository>,
    pub onboarding: Arc<dyn OnboardingRepository>,
    pub audit_repo: Arc<dyn AuditRepository>,
    pub registry: Arc<ConnectionRegistry>,
    pub hub: Arc<AgentHub>,
    pub dispatcher: Arc<Dispatcher>,
    pub waiter: Arc<CompletionWaiter>,
    pub sessions: Arc<SessionService>,
    pub downloads: Arc<DownloadCoordinator>,
    pub broadcaster: EventBroadcaster,
    pub audit: AuditQueue,
    pub agent_update_job: Arc<JobHandle>,
    pub system_update_job: Arc<JobHandle>,
    /// Executes approved system updates from the approval route
    pub system_update_exec: Arc<SystemUpdateJob>,
    /// Seals secret system-settings values; None until a key is configured
    pub sealer: Option<Arc<SecretSealer>>,
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Server bind address
    pub bind_address: String,
    /// Server port
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 12650,
            enable_cors: true,
        }
    }
}

/// API server.
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    /// Create with state and a shared cancellation token.
    pub fn new(config: ApiServerConfig, state: AppState, cancel_token: CancellationToken) -> Self {
        Self {
            config,
            state,
            cancel_token,
        }
    }

    /// Build the router with all middleware and routes.
    pub fn build_router(&self) -> Router {
        let mut router = routes::create_router(self.state.clone());

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }

        router.layer(TraceLayer::new_for_http())
    }

    /// Start the server.
    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| crate::Error::config(format!("Invalid address: {}", e)))?;

        let router = self.build_router();
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("API server listening on http://{}", addr);

        let cancel_token = self.cancel_token.clone();

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            cancel_token.cancelled().await;
            tracing::info!("API server shutting down...");
        })
        .await
        .map_err(|e| crate::Error::Other(format!("Server error: {}", e)))?;

        Ok(())
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}
