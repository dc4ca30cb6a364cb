//! Short-lived remote-tool sessions.
//!
//! A session is a server-minted capability scoped to a node and optionally
//! an allow-list policy. Sessions are TTL-bounded, never revived after
//! expiry, and every path resolved through a session is revalidated against
//! its root.

pub mod cleanup;
pub mod paths;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::database::models::TerminalSessionDbModel;
use crate::database::repositories::{
    NodeRepository, PolicyRepository, SettingsRepository, TerminalSessionRepository,
};
use crate::{Error, Result};

pub use cleanup::SessionCleanupWorker;

/// TTL clamp bounds.
pub const MIN_SESSION_TTL: Duration = Duration::from_secs(1);
pub const MAX_SESSION_TTL: Duration = Duration::from_secs(3600);

/// Default TTL when the caller does not ask for one.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(15 * 60);

/// Clamp a requested TTL into `[1 s, 3600 s]`.
pub fn clamp_ttl(requested_seconds: Option<u64>) -> Duration {
    match requested_seconds {
        Some(secs) => Duration::from_secs(secs)
            .max(MIN_SESSION_TTL)
            .min(MAX_SESSION_TTL),
        None => DEFAULT_SESSION_TTL,
    }
}

/// Session flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionKind {
    Terminal,
    LogViewer,
    FileBrowser,
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Open,
    Expired,
    Closed,
}

/// One live session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub kind: SessionKind,
    pub node_id: String,
    pub policy_id: Option<String>,
    /// Virtual root (file browser) or the allow-listed file (log viewer).
    pub root: String,
    pub byte_limit: i64,
    pub requested_by: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub state: SessionState,
}

impl Session {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// In-memory session cache plus the validation around minting.
pub struct SessionService {
    sessions: DashMap<Uuid, Session>,
    nodes: Arc<dyn NodeRepository>,
    settings: Arc<dyn SettingsRepository>,
    policies: Arc<dyn PolicyRepository>,
    terminals: Arc<dyn TerminalSessionRepository>,
}

impl SessionService {
    pub fn new(
        nodes: Arc<dyn NodeRepository>,
        settings: Arc<dyn SettingsRepository>,
        policies: Arc<dyn PolicyRepository>,
        terminals: Arc<dyn TerminalSessionRepository>,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            nodes,
            settings,
            policies,
            terminals,
        }
    }

    /// Mint a terminal session.
    pub async fn create_terminal(
        &self,
        node_id: &str,
        ttl_seconds: Option<u64>,
        requested_by: &str,
    ) -> Result<Session> {
        self.authorize(node_id).await?;
        let session = self.mint(
            SessionKind::Terminal,
            node_id,
            None,
            "/".to_string(),
            0,
            ttl_seconds,
            requested_by,
        );

        self.terminals
            .insert(&TerminalSessionDbModel {
                id: session.id.to_string(),
                node_id: session.node_id.clone(),
                status: "OPEN".to_string(),
                requested_by: session.requested_by.clone(),
                created_at: session.created_at.to_rfc3339(),
                expires_at: session.expires_at.to_rfc3339(),
            })
            .await?;

        Ok(session)
    }

    /// Mint a log viewer session against an allow-listed log file.
    pub async fn create_log_viewer(
        &self,
        node_id: &str,
        policy_id: &str,
        ttl_seconds: Option<u64>,
        requested_by: &str,
    ) -> Result<Session> {
        self.authorize(node_id).await?;

        let policy = self.policies.get_log_viewer_policy(policy_id).await?;
        if policy.node_id != node_id {
            return Err(Error::validation("policy does not belong to this node"));
        }
        let root = paths::normalize_virtual_path(&policy.path)?;

        Ok(self.mint(
            SessionKind::LogViewer,
            node_id,
            Some(policy.id),
            root,
            policy.max_bytes,
            ttl_seconds,
            requested_by,
        ))
    }

    /// Mint a file browser session rooted at an allow-listed directory.
    pub async fn create_file_browser(
        &self,
        node_id: &str,
        policy_id: &str,
        ttl_seconds: Option<u64>,
        requested_by: &str,
    ) -> Result<Session> {
        self.authorize(node_id).await?;

        let policy = self.policies.get_file_browser_policy(policy_id).await?;
        if policy.node_id != node_id {
            return Err(Error::validation("policy does not belong to this node"));
        }
        let root = paths::normalize_virtual_path(&policy.root_path)?;

        Ok(self.mint(
            SessionKind::FileBrowser,
            node_id,
            Some(policy.id),
            root,
            policy.max_bytes,
            ttl_seconds,
            requested_by,
        ))
    }

    /// Mint an unrestricted file browser session rooted at `/`.
    pub async fn create_system_file_browser(
        &self,
        node_id: &str,
        ttl_seconds: Option<u64>,
        requested_by: &str,
        byte_limit: i64,
    ) -> Result<Session> {
        self.authorize(node_id).await?;
        Ok(self.mint(
            SessionKind::FileBrowser,
            node_id,
            None,
            "/".to_string(),
            byte_limit,
            ttl_seconds,
            requested_by,
        ))
    }

    /// Look up a non-expired session of the given kind. Expired sessions
    /// are marked Expired and never revived.
    pub fn try_get(&self, id: Uuid, kind: SessionKind) -> Option<Session> {
        let mut entry = self.sessions.get_mut(&id)?;
        if entry.kind != kind {
            return None;
        }
        match entry.state {
            SessionState::Closed | SessionState::Expired => None,
            SessionState::Open => {
                if entry.is_expired(Utc::now()) {
                    entry.state = SessionState::Expired;
                    None
                } else {
                    Some(entry.clone())
                }
            }
        }
    }

    /// Close a session. Idempotent.
    pub async fn close(&self, id: Uuid) -> Result<()> {
        if let Some(mut entry) = self.sessions.get_mut(&id) {
            if entry.state == SessionState::Open {
                entry.state = SessionState::Closed;
                if entry.kind == SessionKind::Terminal {
                    self.terminals.set_status(&id.to_string(), "CLOSED").await?;
                }
            }
        }
        Ok(())
    }

    /// Mark newly expired sessions and return them for follow-up work.
    /// Fully dead entries (expired or closed) past the grace period are
    /// evicted from the cache.
    pub async fn sweep(&self, grace: Duration) -> Vec<Session> {
        let now = Utc::now();
        let mut newly_expired = Vec::new();

        for mut entry in self.sessions.iter_mut() {
            if entry.state == SessionState::Open && entry.is_expired(now) {
                entry.state = SessionState::Expired;
                newly_expired.push(entry.clone());
            }
        }

        for session in &newly_expired {
            if session.kind == SessionKind::Terminal {
                if let Err(e) = self
                    .terminals
                    .set_status(&session.id.to_string(), "EXPIRED")
                    .await
                {
                    debug!(session_id = %session.id, error = %e, "Failed to persist expiry");
                }
            }
        }

        let cutoff = now - chrono::Duration::from_std(grace).unwrap_or_default();
        self.sessions.retain(|_, session| {
            session.state == SessionState::Open || session.expires_at > cutoff
        });

        newly_expired
    }

    /// Remote tools must be enabled on the node; the node must exist.
    async fn authorize(&self, node_id: &str) -> Result<()> {
        self.nodes.get(node_id).await?;
        let settings = self.settings.get_node_settings(node_id).await?;
        if !settings.remote_tools_enabled {
            return Err(Error::forbidden("remote tools are disabled on this node"));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn mint(
        &self,
        kind: SessionKind,
        node_id: &str,
        policy_id: Option<String>,
        root: String,
        byte_limit: i64,
        ttl_seconds: Option<u64>,
        requested_by: &str,
    ) -> Session {
        let now = Utc::now();
        let ttl = clamp_ttl(ttl_seconds);
        let session = Session {
            id: Uuid::new_v4(),
            kind,
            node_id: node_id.to_string(),
            policy_id,
            root,
            byte_limit,
            requested_by: requested_by.to_string(),
            created_at: now,
            expires_at: now + chrono::Duration::seconds(ttl.as_secs() as i64),
            state: SessionState::Open,
        };
        self.sessions.insert(session.id, session.clone());
        session
    }
}
