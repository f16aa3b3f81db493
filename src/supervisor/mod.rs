//! Team supervisor: owns the fleet of team clients.
//!
//! # Architecture
//!
//! The supervisor is handed a [`Platform`] (how to build a session for a
//! team's credentials) and the shared shutdown token. `initialize` validates
//! and stores the team records; `connect_all` builds one [`TeamClient`] per
//! team, wires each client's sink to the message pipeline, and connects the
//! whole fleet in parallel. Failures stay contained to their team: the fleet
//! aborts only when not a single team connects.
//!
//! `shutdown` is signal-safe: the shutting-down flag is an atomic
//! check-and-set, so concurrent calls disconnect each client at most once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::client::{MessageSink, TeamClient};
use crate::config::TeamConfig;
use crate::error::AppError;
use crate::message::Message;
use crate::pipeline::MessagePipeline;
use crate::transport::Platform;

// ── pipeline sink ────────────────────────────────────────────────────────────

/// Forwards each accepted message from one team into the shared pipeline.
/// Pipeline-side failures are contained here and never reach the client.
struct PipelineSink {
    pipeline: Arc<MessagePipeline>,
}

#[async_trait]
impl MessageSink for PipelineSink {
    async fn deliver(&self, message: Message) -> Result<(), AppError> {
        self.pipeline.process_message(&message).await;
        Ok(())
    }
}

// ── supervisor ───────────────────────────────────────────────────────────────

pub struct TeamSupervisor {
    platform: Arc<dyn Platform>,
    shutdown: CancellationToken,
    pipeline: Mutex<Option<Arc<MessagePipeline>>>,
    teams: Mutex<HashMap<String, TeamConfig>>,
    clients: Mutex<HashMap<String, Arc<TeamClient>>>,
    initialized: AtomicBool,
    shutting_down: AtomicBool,
}

impl TeamSupervisor {
    pub fn new(platform: Arc<dyn Platform>, shutdown: CancellationToken) -> Self {
        Self {
            platform,
            shutdown,
            pipeline: Mutex::new(None),
            teams: Mutex::new(HashMap::new()),
            clients: Mutex::new(HashMap::new()),
            initialized: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
        }
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<String, Arc<TeamClient>>> {
        self.clients.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Install the pipeline every client sink forwards into. Must happen
    /// before `connect_all`.
    pub fn set_pipeline(&self, pipeline: Arc<MessagePipeline>) {
        *self.pipeline.lock().unwrap_or_else(|e| e.into_inner()) = Some(pipeline);
    }

    /// Validate and store the team records. Single-shot: a second call
    /// fails with `AlreadyInitialized`. No client is created yet.
    pub fn initialize(&self, teams: HashMap<String, TeamConfig>) -> Result<(), AppError> {
        if teams.is_empty() {
            return Err(AppError::BadArgument("teams must be a non-empty mapping".into()));
        }
        for (name, team) in &teams {
            if team.app_token.is_empty() || team.bot_token.is_empty() {
                return Err(AppError::BadArgument(format!(
                    "team '{name}': both credentials are required"
                )));
            }
            if team.channels.is_empty() {
                return Err(AppError::BadArgument(format!(
                    "team '{name}': channel list must not be empty"
                )));
            }
        }
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(AppError::AlreadyInitialized);
        }
        info!(teams = teams.len(), "supervisor initialized");
        *self.teams.lock().unwrap_or_else(|e| e.into_inner()) = teams;
        Ok(())
    }

    /// Create a client per team and connect the whole fleet in parallel.
    /// Per-team failures are logged and contained; the call fails only if
    /// zero teams connect.
    pub async fn connect_all(&self) -> Result<(), AppError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(AppError::NotInitialized);
        }
        if self.is_shutting_down() {
            return Err(AppError::ShuttingDown);
        }
        let pipeline = self
            .pipeline
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| AppError::BadArgument("no message pipeline set".into()))?;

        let teams: Vec<TeamConfig> = {
            let teams = self.teams.lock().unwrap_or_else(|e| e.into_inner());
            teams.values().cloned().collect()
        };

        let mut clients: Vec<Arc<TeamClient>> = Vec::new();
        let mut session_failures = 0usize;
        for team in teams {
            let name = team.name.clone();
            let (transport, directory) = match self.platform.session(&team) {
                Ok(pair) => pair,
                Err(e) => {
                    error!(team = %name, "cannot build session: {e}");
                    session_failures += 1;
                    continue;
                }
            };
            let sink = Arc::new(PipelineSink { pipeline: pipeline.clone() });
            let client = Arc::new(TeamClient::new(
                team,
                transport,
                directory,
                sink,
                self.shutdown.child_token(),
            ));
            self.clients().insert(name, client.clone());
            clients.push(client);
        }

        let results = join_all(clients.iter().map(|c| c.connect())).await;
        let mut connected = 0usize;
        let mut failed = session_failures;
        for (client, result) in clients.iter().zip(results) {
            match result {
                Ok(()) => connected += 1,
                Err(e) => {
                    failed += 1;
                    error!(team = %client.team_name(), "connect failed: {e}");
                }
            }
        }
        if connected == 0 {
            return Err(AppError::NoTeamsConnected { failed });
        }
        info!(connected, failed, "fleet connected");
        Ok(())
    }

    /// Log a per-team error; evict the team if its client is no longer
    /// connected.
    pub async fn handle_team_error(&self, team: &str, err: &AppError) {
        error!(team, "team error: {err}");
        let client = self.clients().get(team).cloned();
        if let Some(client) = client
            && !client.is_connected()
        {
            self.remove_team(team);
        }
    }

    /// Drop a team from the fleet. Teardown is fire-and-forget; the team is
    /// not reconstructed until the process restarts.
    fn remove_team(&self, team: &str) {
        let client = self.clients().remove(team);
        if let Some(client) = client {
            warn!(team, "evicting team");
            tokio::spawn(async move {
                client.disconnect().await;
            });
        }
    }

    /// Disconnect every client concurrently and clear the fleet. Idempotent
    /// and safe against concurrent entry: only the first call does work.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutting down");
        let clients: Vec<Arc<TeamClient>> = {
            let mut map = self.clients();
            map.drain().map(|(_, c)| c).collect()
        };
        join_all(clients.iter().map(|c| c.disconnect())).await;
        self.teams.lock().unwrap_or_else(|e| e.into_inner()).clear();
        *self.pipeline.lock().unwrap_or_else(|e| e.into_inner()) = None;
        info!("connections closed");
    }

    // ── observability accessors ──────────────────────────────────────────────

    pub fn connected_count(&self) -> usize {
        self.clients().values().filter(|c| c.is_connected()).count()
    }

    pub fn total_count(&self) -> usize {
        self.clients().len()
    }

    pub fn connected_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .clients()
            .values()
            .filter(|c| c.is_connected())
            .map(|c| c.team_name().to_string())
            .collect();
        names.sort();
        names
    }

    pub fn all_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Find a client by team name.
    pub fn client(&self, team: &str) -> Option<Arc<TeamClient>> {
        self.clients().get(team).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{
        ApiError, ChannelInfo, Directory, Transport, TransportEvent, UserInfo,
    };
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    struct FakeTransport {
        close_calls: AtomicUsize,
        open_error: Option<ApiError>,
        sessions: Mutex<Vec<mpsc::Sender<TransportEvent>>>,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn open(&self) -> Result<mpsc::Receiver<TransportEvent>, ApiError> {
            if let Some(err) = self.open_error.clone() {
                return Err(err);
            }
            let (tx, rx) = mpsc::channel(8);
            // keep the sender alive so the session stays open
            self.sessions.lock().unwrap().push(tx);
            Ok(rx)
        }

        async fn close(&self) -> Result<(), ApiError> {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            self.sessions.lock().unwrap().clear();
            Ok(())
        }
    }

    struct FakeDirectory;

    #[async_trait]
    impl Directory for FakeDirectory {
        async fn channel(&self, id: &str) -> Result<ChannelInfo, ApiError> {
            Ok(ChannelInfo { id: id.to_string(), name: "general".into(), is_member: true })
        }

        async fn user(&self, id: &str) -> Result<UserInfo, ApiError> {
            Ok(UserInfo { id: id.to_string(), ..UserInfo::default() })
        }
    }

    /// Platform whose transports succeed except for the teams listed in
    /// `auth_fail`, which fail with a revoked token.
    struct FakePlatform {
        auth_fail: Vec<String>,
        transports: Mutex<HashMap<String, Arc<FakeTransport>>>,
    }

    impl FakePlatform {
        fn new(auth_fail: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                auth_fail: auth_fail.iter().map(|s| s.to_string()).collect(),
                transports: Mutex::new(HashMap::new()),
            })
        }

        fn transport(&self, team: &str) -> Arc<FakeTransport> {
            self.transports.lock().unwrap().get(team).cloned().expect("unknown team")
        }
    }

    impl Platform for FakePlatform {
        fn session(
            &self,
            team: &TeamConfig,
        ) -> Result<(Arc<dyn Transport>, Arc<dyn Directory>), ApiError> {
            let open_error = self.auth_fail.contains(&team.name).then(|| {
                ApiError::new("auth failed: token_revoked").with_code("token_revoked")
            });
            let transport = Arc::new(FakeTransport {
                close_calls: AtomicUsize::new(0),
                open_error,
                sessions: Mutex::new(Vec::new()),
            });
            self.transports.lock().unwrap().insert(team.name.clone(), transport.clone());
            Ok((transport, Arc::new(FakeDirectory)))
        }
    }

    fn team(name: &str) -> (String, TeamConfig) {
        (
            name.to_string(),
            TeamConfig {
                name: name.to_string(),
                app_token: "xapp-1-A0-x".into(),
                bot_token: "xoxb-x".into(),
                channels: vec!["C1234567890".into()],
            },
        )
    }

    fn supervisor(platform: Arc<FakePlatform>) -> TeamSupervisor {
        let sup = TeamSupervisor::new(platform, CancellationToken::new());
        sup.set_pipeline(Arc::new(MessagePipeline::new()));
        sup
    }

    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn initialize_is_single_shot() {
        let sup = supervisor(FakePlatform::new(&[]));
        sup.initialize(HashMap::from([team("a")])).unwrap();
        let err = sup.initialize(HashMap::from([team("a")])).unwrap_err();
        assert!(matches!(err, AppError::AlreadyInitialized));
        assert!(sup.is_initialized());
    }

    #[test]
    fn initialize_rejects_empty_mapping_and_bad_teams() {
        let sup = supervisor(FakePlatform::new(&[]));
        assert!(sup.initialize(HashMap::new()).is_err());
        assert!(!sup.is_initialized());

        let (_, mut bad) = team("b");
        bad.channels.clear();
        let err = sup.initialize(HashMap::from([("b".to_string(), bad)])).unwrap_err();
        assert!(err.to_string().contains("'b'"));
        assert!(!sup.is_initialized());
    }

    #[tokio::test]
    async fn connect_all_requires_initialize() {
        let sup = supervisor(FakePlatform::new(&[]));
        assert!(matches!(sup.connect_all().await.unwrap_err(), AppError::NotInitialized));
    }

    #[tokio::test]
    async fn connect_all_contains_auth_failure_to_one_team() {
        let platform = FakePlatform::new(&["bad"]);
        let sup = supervisor(platform.clone());
        sup.initialize(HashMap::from([team("good"), team("bad")])).unwrap();

        sup.connect_all().await.unwrap();

        assert_eq!(sup.connected_count(), 1);
        assert_eq!(sup.total_count(), 2);
        assert_eq!(sup.connected_names(), vec!["good".to_string()]);
        let bad = sup.client("bad").unwrap();
        assert!(bad.is_invalidated());
    }

    #[tokio::test]
    async fn connect_all_fails_when_no_team_connects() {
        let platform = FakePlatform::new(&["a", "b"]);
        let sup = supervisor(platform);
        sup.initialize(HashMap::from([team("a"), team("b")])).unwrap();

        let err = sup.connect_all().await.unwrap_err();
        assert!(matches!(err, AppError::NoTeamsConnected { failed: 2 }));
    }

    #[tokio::test]
    async fn concurrent_shutdown_disconnects_each_client_once() {
        let platform = FakePlatform::new(&[]);
        let sup = Arc::new(supervisor(platform.clone()));
        sup.initialize(HashMap::from([team("a"), team("b")])).unwrap();
        sup.connect_all().await.unwrap();

        let (s1, s2) = (sup.clone(), sup.clone());
        tokio::join!(s1.shutdown(), s2.shutdown());

        assert!(sup.is_shutting_down());
        assert_eq!(sup.total_count(), 0);
        settle().await;
        for name in ["a", "b"] {
            assert_eq!(
                platform.transport(name).close_calls.load(Ordering::SeqCst),
                1,
                "team {name} torn down more than once"
            );
        }
    }

    #[tokio::test]
    async fn connect_all_refused_while_shutting_down() {
        let platform = FakePlatform::new(&[]);
        let sup = supervisor(platform);
        sup.initialize(HashMap::from([team("a")])).unwrap();
        sup.shutdown().await;
        assert!(matches!(sup.connect_all().await.unwrap_err(), AppError::ShuttingDown));
    }

    #[tokio::test]
    async fn team_error_evicts_disconnected_client() {
        let platform = FakePlatform::new(&["x"]);
        let sup = supervisor(platform);
        sup.initialize(HashMap::from([team("ok"), team("x")])).unwrap();
        sup.connect_all().await.unwrap();

        let err = AppError::BadArgument("stream torn".into());
        sup.handle_team_error("x", &err).await;
        settle().await;

        assert_eq!(sup.all_names(), vec!["ok".to_string()]);
        assert_eq!(sup.connected_names(), vec!["ok".to_string()]);
    }
}
