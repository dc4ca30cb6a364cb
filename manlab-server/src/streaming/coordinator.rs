//! Download orchestration: session, agent commands, chunk channel, progress,
//! completion.
//!
//! A download has three independent lifetimes to survive: the HTTP request,
//! the agent connection, and the prepare command. The coordinator owns the
//! download sessions, runs the prepare step (zip or stat) in the background,
//! and turns the per-stream chunk channel into an HTTP body with
//! backpressure and cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use agent_proto::{CommandType, FileListResult, FileZipResult};
use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use futures::stream::BoxStream;
use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::AuditQueue;
use crate::database::repositories::CommandQueueRepository;
use crate::dispatch::{CompletionWaiter, Dispatcher, WaiterConfig};
use crate::notification::{DashboardEvent, EventBroadcaster};
use crate::registry::ConnectionRegistry;
use crate::sessions::Session;
use crate::sessions::paths::resolve_in_root;
use crate::streaming::range::{ByteRange, parse_range};
use crate::streaming::router::{StreamEvent, StreamRouter};
use crate::streaming::session::{DownloadSession, DownloadState};
use crate::{Error, Result};

/// Streaming pipeline tuning. The defaults bound in-flight memory per
/// download at capacity × chunk size = 32 MiB.
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    pub chunk_size: u64,
    pub channel_capacity: usize,
    pub first_chunk_timeout: Duration,
    pub overall_stream_timeout: Duration,
    pub ready_poll_interval: Duration,
    pub zip_ready_timeout: Duration,
    pub stat_timeout: Duration,
    pub progress_emit_bytes: u64,
    pub max_zip_uncompressed_bytes: u64,
    pub max_zip_file_count: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024,
            channel_capacity: 32,
            first_chunk_timeout: Duration::from_secs(60),
            overall_stream_timeout: Duration::from_secs(30 * 60),
            ready_poll_interval: Duration::from_millis(200),
            zip_ready_timeout: Duration::from_secs(2 * 60 * 60),
            stat_timeout: Duration::from_secs(30),
            progress_emit_bytes: 5 * 1024 * 1024,
            max_zip_uncompressed_bytes: 10 * 1024 * 1024 * 1024,
            max_zip_file_count: 100_000,
        }
    }
}

struct DownloadEntry {
    session: RwLock<DownloadSession>,
    /// Root of the download's cancellation tree.
    cancel: tokio_util::sync::CancellationToken,
    /// One streaming consumer per download id.
    stream_claimed: AtomicBool,
    /// At most one command.cancel per download.
    cancel_sent: AtomicBool,
}

/// Everything a route needs to build the streaming response.
pub struct PreparedStream {
    pub partial: bool,
    pub filename: String,
    pub as_zip: bool,
    pub content_length: u64,
    pub content_range: Option<String>,
    pub body: BoxStream<'static, std::io::Result<Bytes>>,
}

/// Orchestrates downloads end to end.
pub struct DownloadCoordinator {
    downloads: DashMap<Uuid, Arc<DownloadEntry>>,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<Dispatcher>,
    commands: Arc<dyn CommandQueueRepository>,
    streams: Arc<StreamRouter>,
    broadcaster: EventBroadcaster,
    audit: AuditQueue,
    config: StreamingConfig,
}

impl DownloadCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        dispatcher: Arc<Dispatcher>,
        commands: Arc<dyn CommandQueueRepository>,
        streams: Arc<StreamRouter>,
        broadcaster: EventBroadcaster,
        audit: AuditQueue,
        config: StreamingConfig,
    ) -> Self {
        Self {
            downloads: DashMap::new(),
            registry,
            dispatcher,
            commands,
            streams,
            broadcaster,
            audit,
            config,
        }
    }

    /// Create a download scoped to a file browser session. Paths are
    /// normalized and must stay inside the session root; more than one path
    /// forces a zip. The prepare step (zip build or file stat) runs in the
    /// background and flips the session to Ready.
    pub async fn create_download(
        self: &Arc<Self>,
        fb_session: &Session,
        raw_paths: &[String],
        as_zip: Option<bool>,
        requested_by: &str,
    ) -> Result<DownloadSession> {
        if raw_paths.is_empty() {
            return Err(Error::validation("at least one path is required"));
        }

        let mut paths = Vec::with_capacity(raw_paths.len());
        for raw in raw_paths {
            paths.push(resolve_in_root(&fb_session.root, raw)?);
        }

        let as_zip = as_zip.unwrap_or(false) || paths.len() > 1;
        let filename = Self::pick_filename(&paths, as_zip);

        let mut session = DownloadSession::new(
            &fb_session.node_id,
            fb_session.id,
            paths,
            as_zip,
            filename,
            requested_by,
        );
        session.state = DownloadState::Preparing;

        let entry = Arc::new(DownloadEntry {
            session: RwLock::new(session.clone()),
            cancel: tokio_util::sync::CancellationToken::new(),
            stream_claimed: AtomicBool::new(false),
            cancel_sent: AtomicBool::new(false),
        });
        self.downloads.insert(session.id, Arc::clone(&entry));

        self.audit.record(
            "download.created",
            "download",
            requested_by,
            Some(session.node_id.clone()),
            true,
            format!("download {} ({} paths)", session.id, session.paths.len()),
        );

        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            coordinator.prepare(entry).await;
        });

        Ok(session)
    }

    /// Current session state for status queries.
    pub fn status(&self, id: Uuid) -> Result<DownloadSession> {
        let entry = self
            .downloads
            .get(&id)
            .ok_or_else(|| Error::not_found("Download", id.to_string()))?;
        let session = entry.session.read().clone();
        Ok(session)
    }

    /// Cancel a download: trips the cancellation scope, drops the chunk
    /// channel, and best-effort notifies the agent exactly once.
    pub async fn cancel(&self, id: Uuid, actor: &str) -> Result<DownloadSession> {
        let entry = self
            .downloads
            .get(&id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| Error::not_found("Download", id.to_string()))?;

        let node_id = {
            let mut session = entry.session.write();
            if session.state.is_terminal() {
                return Ok(session.clone());
            }
            session.state = DownloadState::Cancelled;
            session.completed_at = Some(Utc::now());
            session.node_id.clone()
        };

        entry.cancel.cancel();
        self.streams.cancel(id);

        if entry
            .cancel_sent
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.dispatcher.send_cancel(&node_id, id).await;
        }

        self.audit.record(
            "download.cancelled",
            "download",
            actor,
            Some(node_id),
            true,
            format!("download {}", id),
        );

        Ok(entry.session.read().clone())
    }

    /// Open the byte stream for a download.
    ///
    /// Exactly one `/stream` call may own a download; overlapping calls get
    /// a conflict. Waits for the prepare step, resolves the optional Range
    /// header, issues `file.stream`, and returns the response pieces.
    pub async fn stream(
        self: &Arc<Self>,
        id: Uuid,
        range_header: Option<&str>,
    ) -> Result<PreparedStream> {
        let entry = self
            .downloads
            .get(&id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| Error::not_found("Download", id.to_string()))?;

        if entry
            .stream_claimed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::conflict("download is already being streamed"));
        }

        match self.open_stream(&entry, id, range_header).await {
            Ok(prepared) => Ok(prepared),
            Err(e) => {
                // The claim is released so a later retry can stream.
                entry.stream_claimed.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn open_stream(
        self: &Arc<Self>,
        entry: &Arc<DownloadEntry>,
        id: Uuid,
        range_header: Option<&str>,
    ) -> Result<PreparedStream> {
        let (total, source_path, as_zip, filename, node_id) = self.wait_ready(entry).await?;

        let range = range_header.and_then(|h| parse_range(h, total));
        let (start, expected, content_range) = match range {
            Some(ByteRange { start, end }) => (
                start,
                end - start + 1,
                Some(ByteRange { start, end }.content_range(total)),
            ),
            None => (0, total, None),
        };

        let Some(connection_id) = self.registry.get(&node_id) else {
            return Err(Error::AgentDisconnected);
        };

        let receiver = self
            .streams
            .register(id, &connection_id, self.config.channel_capacity);

        // Fire-and-forget: the stream command completes agent-side after the
        // last chunk; its queue entry is bookkeeping only.
        let payload = serde_json::json!({
            "streamId": id,
            "path": source_path,
            "startOffset": start,
            "endOffset": start + expected,
            "chunkSize": self.config.chunk_size,
        });
        if let Err(e) = self
            .dispatcher
            .enqueue_and_dispatch(&node_id, CommandType::FileStream, payload)
            .await
        {
            self.streams.cancel(id);
            return Err(e);
        }

        {
            let mut session = entry.session.write();
            session.state = DownloadState::Downloading;
        }
        info!(download_id = %id, node_id, start, expected, "Streaming download");

        let pump = BodyPump {
            coordinator: Arc::clone(self),
            entry: Arc::clone(entry),
            rx: receiver.rx,
            download_id: id,
            expected,
            received: 0,
            emitted_at: 0,
            first_chunk_deadline: Instant::now() + self.config.first_chunk_timeout,
            overall_deadline: Instant::now() + self.config.overall_stream_timeout,
            finished: false,
        };

        let body = Box::pin(futures::stream::unfold(pump, |mut pump| async move {
            pump.next().await.map(|item| (item, pump))
        }));

        Ok(PreparedStream {
            partial: content_range.is_some(),
            filename,
            as_zip,
            content_length: expected,
            content_range,
            body,
        })
    }

    /// Background prepare step: zip build for archives, a stat via
    /// `file.list` for single files. Flips the session to Ready or Failed.
    async fn prepare(self: Arc<Self>, entry: Arc<DownloadEntry>) {
        let (id, node_id, paths, as_zip) = {
            let session = entry.session.read();
            (
                session.id,
                session.node_id.clone(),
                session.paths.clone(),
                session.as_zip,
            )
        };

        let result = if as_zip {
            self.prepare_zip(&entry, id, &node_id, &paths).await
        } else {
            self.prepare_stat(&entry, &node_id, &paths[0]).await
        };

        match result {
            Ok(()) => {
                let mut session = entry.session.write();
                if session.state == DownloadState::Preparing {
                    session.state = DownloadState::Ready;
                }
            }
            Err(e) => {
                let mut session = entry.session.write();
                if !session.state.is_terminal() {
                    warn!(download_id = %id, error = %e, "Download prepare failed");
                    session.state = DownloadState::Failed;
                    session.completed_at = Some(Utc::now());
                    session.error = Some(e.to_string());
                }
            }
        }
    }

    async fn prepare_zip(
        &self,
        entry: &Arc<DownloadEntry>,
        id: Uuid,
        node_id: &str,
        paths: &[String],
    ) -> Result<()> {
        let payload = serde_json::json!({
            "downloadId": id,
            "paths": paths,
            "maxUncompressedBytes": self.config.max_zip_uncompressed_bytes,
            "maxFileCount": self.config.max_zip_file_count,
        });
        let command_id = self
            .dispatcher
            .enqueue_and_dispatch(node_id, CommandType::FileZip, payload)
            .await?;

        let waiter = self.prepare_waiter(self.config.zip_ready_timeout);
        let item = waiter.wait(&command_id, self.config.zip_ready_timeout).await?;

        let raw = item.output_log.unwrap_or_default();
        let result: FileZipResult =
            serde_json::from_str(&raw).map_err(|_| Error::MalformedAgentResponse)?;
        if result.total_bytes == 0 {
            return Err(Error::AgentFailed {
                output: "agent reported an empty archive".to_string(),
            });
        }

        let mut session = entry.session.write();
        session.total_bytes = Some(result.total_bytes);
        session.temp_file_path = Some(result.temp_file_path);
        Ok(())
    }

    async fn prepare_stat(
        &self,
        entry: &Arc<DownloadEntry>,
        node_id: &str,
        path: &str,
    ) -> Result<()> {
        let payload = serde_json::json!({ "path": path });
        let command_id = self
            .dispatcher
            .enqueue_and_dispatch(node_id, CommandType::FileList, payload)
            .await?;

        let waiter = self.prepare_waiter(self.config.stat_timeout);
        let item = waiter.wait(&command_id, self.config.stat_timeout).await?;

        let raw = item.output_log.unwrap_or_default();
        let listing = FileListResult::parse(&raw).map_err(|_| Error::MalformedAgentResponse)?;
        let [only] = listing.entries.as_slice() else {
            return Err(Error::validation(
                "path resolves to a directory; request a zip download",
            ));
        };
        if only.is_dir {
            return Err(Error::validation(
                "path resolves to a directory; request a zip download",
            ));
        }

        let mut session = entry.session.write();
        session.total_bytes = Some(only.size);
        Ok(())
    }

    fn prepare_waiter(&self, timeout: Duration) -> CompletionWaiter {
        CompletionWaiter::with_config(
            Arc::clone(&self.commands),
            WaiterConfig {
                poll_interval: self.config.ready_poll_interval,
                file_op_timeout: timeout,
                generic_timeout: timeout,
            },
        )
    }

    /// Poll until the prepare step finishes (200 ms interval, bounded by the
    /// zip-ready deadline). Returns the stream source.
    async fn wait_ready(
        &self,
        entry: &Arc<DownloadEntry>,
    ) -> Result<(u64, String, bool, String, String)> {
        let deadline = Instant::now() + self.config.zip_ready_timeout;

        loop {
            if entry.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            {
                let session = entry.session.read();
                match session.state {
                    DownloadState::Ready | DownloadState::Downloading => {
                        let total = session.total_bytes.unwrap_or(0);
                        if total > 0 {
                            let source = if session.as_zip {
                                session
                                    .temp_file_path
                                    .clone()
                                    .ok_or_else(|| Error::Other("zip staged without path".into()))?
                            } else {
                                session.paths[0].clone()
                            };
                            return Ok((
                                total,
                                source,
                                session.as_zip,
                                session.filename.clone(),
                                session.node_id.clone(),
                            ));
                        }
                    }
                    DownloadState::Failed => {
                        return Err(Error::AgentFailed {
                            output: session.error.clone().unwrap_or_default(),
                        });
                    }
                    DownloadState::Cancelled => return Err(Error::Cancelled),
                    DownloadState::Created | DownloadState::Preparing => {}
                    DownloadState::Completed => {
                        return Err(Error::conflict("download already completed"));
                    }
                }
            }

            if Instant::now() >= deadline {
                return Err(Error::AgentTimeout);
            }
            tokio::time::sleep(self.config.ready_poll_interval).await;
        }
    }

    fn pick_filename(paths: &[String], as_zip: bool) -> String {
        let basename = |p: &str| {
            p.rsplit('/')
                .next()
                .filter(|s| !s.is_empty())
                .unwrap_or("download")
                .to_string()
        };
        if !as_zip {
            return basename(&paths[0]);
        }
        if paths.len() == 1 {
            format!("{}.zip", basename(&paths[0]))
        } else {
            "files.zip".to_string()
        }
    }

    fn emit_progress(&self, id: Uuid, transferred: u64, total: Option<u64>) {
        self.broadcaster.broadcast(DashboardEvent::DownloadProgress {
            download_id: id.to_string(),
            transferred_bytes: transferred,
            total_bytes: total,
        });
    }
}

/// The chunk-channel → HTTP-body pump. Drop doubles as the client-gone
/// signal: an unfinished pump dropped with the response cancels the
/// download.
struct BodyPump {
    coordinator: Arc<DownloadCoordinator>,
    entry: Arc<DownloadEntry>,
    rx: tokio::sync::mpsc::Receiver<StreamEvent>,
    download_id: Uuid,
    expected: u64,
    received: u64,
    emitted_at: u64,
    first_chunk_deadline: Instant,
    overall_deadline: Instant,
    finished: bool,
}

impl BodyPump {
    async fn next(&mut self) -> Option<std::io::Result<Bytes>> {
        if self.finished {
            return None;
        }

        let deadline = if self.received == 0 {
            self.first_chunk_deadline.min(self.overall_deadline)
        } else {
            self.overall_deadline
        };

        let event = tokio::select! {
            _ = self.entry.cancel.cancelled() => {
                return Some(self.abort("download cancelled"));
            }
            event = tokio::time::timeout_at(deadline, self.rx.recv()) => event,
        };

        match event {
            Err(_) if self.received == 0 => {
                Some(self.fail("agent did not start streaming within the deadline").await)
            }
            Err(_) => Some(self.fail("stream exceeded the overall deadline").await),
            Ok(None) => {
                if self.entry.cancel.is_cancelled() {
                    Some(self.abort("download cancelled"))
                } else {
                    Some(self.fail("stream interrupted").await)
                }
            }
            Ok(Some(StreamEvent::Chunk(bytes))) => {
                self.received += bytes.len() as u64;
                if self.received.saturating_sub(self.emitted_at)
                    >= self.coordinator.config.progress_emit_bytes
                {
                    self.emitted_at = self.received;
                    let total = {
                        let mut session = self.entry.session.write();
                        session.transferred_bytes = self.received;
                        session.total_bytes
                    };
                    self.coordinator
                        .emit_progress(self.download_id, self.received, total);
                }
                Some(Ok(bytes))
            }
            Ok(Some(StreamEvent::End { error: Some(e) })) => {
                Some(self.fail(&format!("agent reported stream error: {e}")).await)
            }
            Ok(Some(StreamEvent::End { error: None })) => {
                if self.received != self.expected {
                    return Some(
                        self.fail(&format!(
                            "stream ended early: {} of {} bytes",
                            self.received, self.expected
                        ))
                        .await,
                    );
                }
                self.complete();
                None
            }
        }
    }

    fn complete(&mut self) {
        self.finished = true;
        let total = {
            let mut session = self.entry.session.write();
            session.transferred_bytes = self.received;
            session.state = DownloadState::Completed;
            session.completed_at = Some(Utc::now());
            session.total_bytes
        };
        self.coordinator
            .emit_progress(self.download_id, self.received, total);
        self.coordinator.audit.record(
            "download.completed",
            "download",
            "system",
            Some(self.entry.session.read().node_id.clone()),
            true,
            format!("download {} ({} bytes)", self.download_id, self.received),
        );
        debug!(download_id = %self.download_id, bytes = self.received, "Download completed");
    }

    async fn fail(&mut self, reason: &str) -> std::io::Result<Bytes> {
        self.finished = true;
        let node_id = {
            let mut session = self.entry.session.write();
            if !session.state.is_terminal() {
                session.state = DownloadState::Failed;
                session.completed_at = Some(Utc::now());
                session.error = Some(reason.to_string());
            }
            session.node_id.clone()
        };

        self.coordinator.streams.cancel(self.download_id);
        if self
            .entry
            .cancel_sent
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.coordinator
                .dispatcher
                .send_cancel(&node_id, self.download_id)
                .await;
        }

        warn!(download_id = %self.download_id, reason, "Download stream failed");
        Err(std::io::Error::other(reason.to_string()))
    }

    fn abort(&mut self, reason: &str) -> std::io::Result<Bytes> {
        self.finished = true;
        Err(std::io::Error::other(reason.to_string()))
    }
}

impl Drop for BodyPump {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // The response body was dropped mid-stream: the client went away.
        let coordinator = Arc::clone(&self.coordinator);
        let download_id = self.download_id;
        tokio::spawn(async move {
            debug!(download_id = %download_id, "Client disconnected; cancelling download");
            let _ = coordinator.cancel(download_id, "client").await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_memory_pool;
    use crate::database::models::{NodeDbModel, NodeStatus};
    use crate::database::repositories::{
        NodeRepository, SqlxAuditRepository, SqlxCommandQueueRepository, SqlxNodeRepository,
    };
    use crate::hub::connections::ConnectionMap;
    use crate::sessions::{SessionKind, SessionState};
    use agent_proto::CommandStatus;
    use futures::StreamExt;
    use tokio_util::sync::CancellationToken;

    struct Harness {
        coordinator: Arc<DownloadCoordinator>,
        commands: Arc<dyn CommandQueueRepository>,
        registry: Arc<ConnectionRegistry>,
        connections: Arc<ConnectionMap>,
        streams: Arc<StreamRouter>,
    }

    async fn harness() -> Harness {
        let pool = init_memory_pool().await.unwrap();
        SqlxNodeRepository::new(pool.clone())
            .create(&NodeDbModel {
                id: "n1".to_string(),
                hostname: "n1".to_string(),
                os: String::new(),
                status: NodeStatus::Online.as_str().to_string(),
                last_seen: None,
                agent_version: String::new(),
                auth_key_hash: "h".to_string(),
                ip_address: None,
                created_at: Utc::now().to_rfc3339(),
            })
            .await
            .unwrap();

        let commands: Arc<dyn CommandQueueRepository> =
            Arc::new(SqlxCommandQueueRepository::new(pool.clone()));
        let registry = Arc::new(ConnectionRegistry::new());
        let connections = Arc::new(ConnectionMap::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&connections),
            Arc::clone(&commands),
        ));
        let streams = Arc::new(StreamRouter::new());
        let audit = AuditQueue::start(
            Arc::new(SqlxAuditRepository::new(pool)),
            CancellationToken::new(),
        );

        let config = StreamingConfig {
            ready_poll_interval: Duration::from_millis(10),
            first_chunk_timeout: Duration::from_millis(500),
            overall_stream_timeout: Duration::from_secs(5),
            zip_ready_timeout: Duration::from_secs(5),
            stat_timeout: Duration::from_secs(2),
            progress_emit_bytes: 8,
            channel_capacity: 4,
            chunk_size: 4,
            ..StreamingConfig::default()
        };

        let coordinator = Arc::new(DownloadCoordinator::new(
            registry.clone(),
            dispatcher,
            Arc::clone(&commands),
            Arc::clone(&streams),
            EventBroadcaster::new(),
            audit,
            config,
        ));

        Harness {
            coordinator,
            commands,
            registry,
            connections,
            streams,
        }
    }

    fn fb_session(root: &str) -> Session {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4(),
            kind: SessionKind::FileBrowser,
            node_id: "n1".to_string(),
            policy_id: None,
            root: root.to_string(),
            byte_limit: 32_768,
            requested_by: "admin".to_string(),
            created_at: now,
            expires_at: now + chrono::Duration::minutes(10),
            state: SessionState::Open,
        }
    }

    /// Simulate the agent completing the prepare command.
    async fn complete_prepare(h: &Harness, output: &str) {
        for _ in 0..100 {
            let pending = h.commands.list_pending("n1").await.unwrap();
            if let Some(item) = pending.first() {
                h.commands
                    .complete(&item.id, CommandStatus::Success, output)
                    .await
                    .unwrap();
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("prepare command never appeared");
    }

    #[tokio::test]
    async fn test_paths_outside_root_rejected() {
        let h = harness().await;
        let session = fb_session("/srv");
        let err = h
            .coordinator
            .create_download(&session, &["/etc/passwd".to_string()], None, "admin")
            .await;
        assert!(matches!(err, Err(Error::PathOutsideRoot { .. })));

        let err = h
            .coordinator
            .create_download(&session, &["/srv/../etc".to_string()], None, "admin")
            .await;
        assert!(matches!(err, Err(Error::PathTraversal)));
    }

    #[tokio::test]
    async fn test_multiple_paths_force_zip() {
        let h = harness().await;
        let session = fb_session("/");
        let download = h
            .coordinator
            .create_download(
                &session,
                &["/a.txt".to_string(), "/b.txt".to_string()],
                None,
                "admin",
            )
            .await
            .unwrap();
        assert!(download.as_zip);
        assert_eq!(download.filename, "files.zip");
    }

    #[tokio::test]
    async fn test_single_file_stream_end_to_end() {
        let h = harness().await;
        h.registry.bind("n1", "c1");
        let (tx, mut agent_rx) = tokio::sync::mpsc::channel(16);
        h.connections.insert("c1", tx);

        let session = fb_session("/");
        let download = h
            .coordinator
            .create_download(&session, &["/data/blob.bin".to_string()], None, "admin")
            .await
            .unwrap();
        assert_eq!(download.filename, "blob.bin");

        // Agent answers the stat.
        complete_prepare(
            &h,
            r#"{"entries":[{"name":"blob.bin","path":"/data/blob.bin","isDir":false,"size":10}],"truncated":false}"#,
        )
        .await;

        let prepared = h.coordinator.stream(download.id, None).await.unwrap();
        assert!(!prepared.partial);
        assert_eq!(prepared.content_length, 10);

        // Overlapping stream conflicts while the first is live.
        match Arc::clone(&h.coordinator).stream(download.id, None).await {
            Err(Error::Conflict(_)) => {}
            other => panic!("expected conflict, got {:?}", other.map(|_| ())),
        }

        // Agent streams two chunks then ends.
        h.streams
            .deliver_chunk(download.id, Bytes::from_static(b"01234"))
            .await;
        h.streams
            .deliver_chunk(download.id, Bytes::from_static(b"56789"))
            .await;
        h.streams.finish(download.id, None).await;

        let mut body = prepared.body;
        let mut collected = Vec::new();
        while let Some(item) = body.next().await {
            collected.extend_from_slice(&item.unwrap());
        }
        assert_eq!(collected, b"0123456789");

        let status = h.coordinator.status(download.id).unwrap();
        assert_eq!(status.state, DownloadState::Completed);
        assert_eq!(status.transferred_bytes, 10);
        assert_eq!(status.total_bytes, Some(10));

        // The agent received the file.stream command.
        let mut saw_stream = false;
        while let Ok(message) = agent_rx.try_recv() {
            if let agent_proto::ServerMessage::ExecuteCommand { command_type, .. } = message {
                if command_type == CommandType::FileStream {
                    saw_stream = true;
                }
            }
        }
        assert!(saw_stream);
    }

    #[tokio::test]
    async fn test_range_request_is_partial() {
        let h = harness().await;
        h.registry.bind("n1", "c1");
        let (tx, _agent_rx) = tokio::sync::mpsc::channel(16);
        h.connections.insert("c1", tx);

        let session = fb_session("/");
        let download = h
            .coordinator
            .create_download(&session, &["/f.bin".to_string()], None, "admin")
            .await
            .unwrap();
        complete_prepare(
            &h,
            r#"{"entries":[{"name":"f.bin","path":"/f.bin","isDir":false,"size":100}]}"#,
        )
        .await;

        let prepared = h
            .coordinator
            .stream(download.id, Some("bytes=40-"))
            .await
            .unwrap();
        assert!(prepared.partial);
        assert_eq!(prepared.content_length, 60);
        assert_eq!(prepared.content_range.as_deref(), Some("bytes 40-99/100"));
    }

    #[tokio::test]
    async fn test_zip_prepare_failure_fails_download() {
        let h = harness().await;
        let session = fb_session("/");
        let download = h
            .coordinator
            .create_download(
                &session,
                &["/a".to_string(), "/b".to_string()],
                Some(true),
                "admin",
            )
            .await
            .unwrap();

        // Agent fails the zip.
        for _ in 0..100 {
            let pending = h.commands.list_pending("n1").await.unwrap();
            if let Some(item) = pending.first() {
                h.commands
                    .complete(&item.id, CommandStatus::Failed, "disk full")
                    .await
                    .unwrap();
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Status flips to Failed once the watcher observes the result.
        for _ in 0..100 {
            if h.coordinator.status(download.id).unwrap().state == DownloadState::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let status = h.coordinator.status(download.id).unwrap();
        assert_eq!(status.state, DownloadState::Failed);
        assert!(status.error.unwrap().contains("disk full"));
    }

    #[tokio::test]
    async fn test_zip_download_streams_from_temp_file() {
        let h = harness().await;
        h.registry.bind("n1", "c1");
        let (tx, mut agent_rx) = tokio::sync::mpsc::channel(16);
        h.connections.insert("c1", tx);

        let session = fb_session("/");
        let download = h
            .coordinator
            .create_download(
                &session,
                &["/a.txt".to_string(), "/b.txt".to_string()],
                None,
                "admin",
            )
            .await
            .unwrap();

        complete_prepare(
            &h,
            r#"{"totalBytes": 6, "tempFilePath": "/tmp/manlab-zip-123.zip"}"#,
        )
        .await;

        let prepared = h.coordinator.stream(download.id, None).await.unwrap();
        assert!(prepared.as_zip);
        assert_eq!(prepared.content_length, 6);

        // The stream command targets the agent-side temp file.
        let mut stream_path = None;
        for _ in 0..10 {
            match agent_rx.recv().await.unwrap() {
                agent_proto::ServerMessage::ExecuteCommand {
                    command_type: CommandType::FileStream,
                    payload,
                    ..
                } => {
                    stream_path = payload["path"].as_str().map(str::to_string);
                    break;
                }
                _ => continue,
            }
        }
        assert_eq!(stream_path.as_deref(), Some("/tmp/manlab-zip-123.zip"));

        h.streams
            .deliver_chunk(download.id, Bytes::from_static(b"zipzip"))
            .await;
        h.streams.finish(download.id, None).await;

        let mut body = prepared.body;
        let mut collected = Vec::new();
        while let Some(item) = body.next().await {
            collected.extend_from_slice(&item.unwrap());
        }
        assert_eq!(collected, b"zipzip");
        assert_eq!(
            h.coordinator.status(download.id).unwrap().state,
            DownloadState::Completed
        );
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_and_notifies_once() {
        let h = harness().await;
        h.registry.bind("n1", "c1");
        let (tx, mut agent_rx) = tokio::sync::mpsc::channel(16);
        h.connections.insert("c1", tx);

        let session = fb_session("/");
        let download = h
            .coordinator
            .create_download(&session, &["/f".to_string()], None, "admin")
            .await
            .unwrap();

        let first = h.coordinator.cancel(download.id, "admin").await.unwrap();
        assert_eq!(first.state, DownloadState::Cancelled);
        let second = h.coordinator.cancel(download.id, "admin").await.unwrap();
        assert_eq!(second.state, DownloadState::Cancelled);

        // Exactly one command.cancel went to the agent.
        let mut cancels = 0;
        while let Ok(message) = agent_rx.try_recv() {
            if let agent_proto::ServerMessage::ExecuteCommand { command_type, .. } = message {
                if command_type == CommandType::CommandCancel {
                    cancels += 1;
                }
            }
        }
        assert_eq!(cancels, 1);
    }

    #[tokio::test]
    async fn test_stream_without_connection_is_agent_disconnected() {
        let h = harness().await;
        let session = fb_session("/");
        let download = h
            .coordinator
            .create_download(&session, &["/f".to_string()], None, "admin")
            .await
            .unwrap();
        complete_prepare(
            &h,
            r#"{"entries":[{"name":"f","path":"/f","isDir":false,"size":5}]}"#,
        )
        .await;

        match Arc::clone(&h.coordinator).stream(download.id, None).await {
            Err(Error::AgentDisconnected) => {}
            other => panic!("expected AgentDisconnected, got {:?}", other.map(|_| ())),
        }

        // The failed attempt released the claim; binding the agent lets a
        // retry proceed.
        h.registry.bind("n1", "c1");
        let (tx, _rx) = tokio::sync::mpsc::channel(16);
        h.connections.insert("c1", tx);
        assert!(Arc::clone(&h.coordinator).stream(download.id, None).await.is_ok());
    }
}
