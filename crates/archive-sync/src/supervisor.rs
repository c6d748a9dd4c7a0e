//! Runs one independent backfill + live pair per configured credential.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use archive_types::Credential;

use crate::api::SlackApi;
use crate::backfill::Backfill;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::http::HttpSlackClient;
use crate::live::LiveMerger;
use crate::rate_limit::RateLimitedClient;
use crate::rtm::{RealtimeConnector, RtmConnector};
use crate::store::Store;
use crate::work_queue::{WORK_QUEUE_CAPACITY, WorkQueue};

/// How long [`Supervisor::shutdown`] waits for teams before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Builds the platform clients for a credential.
pub trait ClientFactory: Send + Sync {
    fn web_api(&self, credential: &Credential) -> Result<Arc<dyn SlackApi>>;
    fn realtime(&self, credential: &Credential) -> Result<Arc<dyn RealtimeConnector>>;
}

/// The real platform: Web API over the OAuth token, real-time over the bot token.
pub struct SlackClients {
    api_url: String,
}

impl SlackClients {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
        }
    }
}

impl ClientFactory for SlackClients {
    fn web_api(&self, credential: &Credential) -> Result<Arc<dyn SlackApi>> {
        Ok(Arc::new(HttpSlackClient::new(&self.api_url, &credential.oauth_token)?))
    }

    fn realtime(&self, credential: &Credential) -> Result<Arc<dyn RealtimeConnector>> {
        Ok(Arc::new(RtmConnector::new(&self.api_url, &credential.bot_token)?))
    }
}

/// How a team task ended.
#[derive(Debug)]
pub enum TeamExit {
    /// Cancelled by shutdown or [`Supervisor::remove_team`].
    Finished,
    Failed(SyncError),
    Panicked(String),
}

struct TeamHandle {
    cancel: CancellationToken,
    generation: u64,
}

pub struct Supervisor {
    store: Store,
    config: SyncConfig,
    clients: Arc<dyn ClientFactory>,
    cancel: CancellationToken,
    teams: HashMap<String, TeamHandle>,
    tasks: JoinSet<(String, u64, TeamExit)>,
    generation: u64,
}

impl Supervisor {
    pub fn new(store: Store, config: SyncConfig, clients: Arc<dyn ClientFactory>) -> Self {
        Self {
            store,
            config,
            clients,
            cancel: CancellationToken::new(),
            teams: HashMap::new(),
            tasks: JoinSet::new(),
            generation: 0,
        }
    }

    /// Cancelling this stops every team.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn active_teams(&self) -> Vec<String> {
        let mut teams: Vec<String> = self.teams.keys().cloned().collect();
        teams.sort();
        teams
    }

    /// Start every credential in order. Rejected credentials are skipped
    /// quietly; other startup failures are logged and skipped. Returns the
    /// number of teams started.
    pub async fn start(&mut self, credentials: Vec<Credential>) -> usize {
        let mut started = 0;
        for credential in credentials {
            info!("Starting archive bot for token {}", credential.redacted());
            match self.add_team(credential.clone()).await {
                Ok(team_id) => {
                    info!(team = %team_id, "Team active");
                    started += 1;
                }
                Err(e) if e.is_auth() => {
                    debug!("Skipping credential {}: {}", credential.redacted(), e)
                }
                Err(e) => error!("Error starting client {}: {}", credential.redacted(), e),
            }
        }
        started
    }

    /// Identify the credential's team and spawn its task. A team that is
    /// already running is left alone.
    pub async fn add_team(&mut self, credential: Credential) -> Result<String> {
        let team_cancel = self.cancel.child_token();
        let client = RateLimitedClient::new(self.clients.web_api(&credential)?, team_cancel.clone());
        let team = client.call("team.info", || client.api().team_info()).await?;

        if self.teams.contains_key(&team.id) {
            warn!(team = %team.id, "Team already active, ignoring duplicate credential");
            return Ok(team.id);
        }

        let connector = self.clients.realtime(&credential)?;
        self.generation += 1;
        let generation = self.generation;

        let task = TeamTask {
            team_id: team.id.clone(),
            backfill: Backfill::new(team.id.clone(), credential.bot_token.clone(), client, self.store.clone()),
            connector,
            store: self.store.clone(),
            config: self.config.clone(),
            cancel: team_cancel.clone(),
        };

        let team_id = team.id.clone();
        let stop = team_cancel.clone();
        self.tasks.spawn(async move {
            let exit = match guarded(task.run()).await {
                Ok(Ok(())) => TeamExit::Finished,
                Ok(Err(e)) => TeamExit::Failed(e),
                Err(panic) => TeamExit::Panicked(panic),
            };
            // Releases the merger and work queue if the task unwound
            stop.cancel();
            (team_id, generation, exit)
        });

        self.teams.insert(
            team.id.clone(),
            TeamHandle {
                cancel: team_cancel,
                generation,
            },
        );
        Ok(team.id)
    }

    /// Stop a team. Its task winds down in the background.
    pub fn remove_team(&mut self, team_id: &str) -> bool {
        match self.teams.remove(team_id) {
            Some(handle) => {
                info!(team = %team_id, "Removing team");
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Wait for the next team task to end and log how it ended. `None` once
    /// no tasks remain.
    pub async fn next_exit(&mut self) -> Option<(String, TeamExit)> {
        loop {
            let (team_id, generation, exit) = match self.tasks.join_next().await? {
                Ok(done) => done,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => {
                    error!("Team task failed to join: {}", e);
                    continue;
                }
            };

            if self.teams.get(&team_id).is_some_and(|h| h.generation == generation) {
                self.teams.remove(&team_id);
            }

            match &exit {
                TeamExit::Finished => info!(team = %team_id, "Team stopped"),
                TeamExit::Failed(e) => error!(team = %team_id, "Team stopped after error: {}", e),
                TeamExit::Panicked(msg) => error!(team = %team_id, "Team task panicked: {}", msg),
            }
            return Some((team_id, exit));
        }
    }

    /// Run until every team has stopped.
    pub async fn run(&mut self) {
        while self.next_exit().await.is_some() {}
    }

    /// Cancel every team and wait for them, aborting stragglers after a
    /// grace period.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.run()).await.is_err() {
            warn!("Teams did not stop within {:?}, aborting", SHUTDOWN_GRACE);
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }
        self.teams.clear();
    }

    /// One unfloored pass per credential, in order, with no live merger.
    /// Returns the number of teams synced.
    pub async fn run_once(&self, credentials: Vec<Credential>) -> usize {
        let mut synced = 0;
        for credential in credentials {
            info!("Retrieving full history for token {}", credential.redacted());
            match guarded(self.sync_once(&credential)).await {
                Ok(Ok(team_id)) => {
                    info!(team = %team_id, "Init finished");
                    synced += 1;
                }
                Ok(Err(e)) if e.is_auth() => {
                    debug!("Skipping credential {}: {}", credential.redacted(), e)
                }
                Ok(Err(e)) => error!("Sync error for {}: {}", credential.redacted(), e),
                Err(panic) => error!("Sync for {} panicked: {}", credential.redacted(), panic),
            }
        }
        synced
    }

    async fn sync_once(&self, credential: &Credential) -> Result<String> {
        let client = RateLimitedClient::new(self.clients.web_api(credential)?, self.cancel.child_token());
        let team = client.call("team.info", || client.api().team_info()).await?;

        Backfill::new(team.id.clone(), credential.bot_token.clone(), client, self.store.clone())
            .run(None)
            .await?;
        Ok(team.id)
    }
}

/// Everything one team runs: the first pass, the live merger once that pass
/// is done, then a pass every interval.
struct TeamTask {
    team_id: String,
    backfill: Backfill,
    connector: Arc<dyn RealtimeConnector>,
    store: Store,
    config: SyncConfig,
    cancel: CancellationToken,
}

impl TeamTask {
    async fn run(self) -> Result<()> {
        let (work, dispatcher) = WorkQueue::start(WORK_QUEUE_CAPACITY, self.config.work_jitter, self.cancel.clone());

        let since = if self.store.team_has_messages(&self.team_id).await? {
            Some(self.config.recent_floor(Utc::now()))
        } else {
            None
        };
        let first = self.pass(since).await;

        let resync = Resync::new(self.team_id.clone(), self.backfill.clone());
        let hook = resync.clone();
        let mut merger = LiveMerger::new(
            self.team_id.clone(),
            self.connector.clone(),
            self.store.clone(),
            work.clone(),
            self.backfill.bot_importer().clone(),
            self.cancel.clone(),
        )
        .on_reconnect(move || hook.trigger());

        let result = match first {
            Err(e) => Err(e),
            Ok(()) => {
                let team_id = self.team_id.clone();
                let live = tokio::spawn(async move {
                    match guarded(merger.run()).await {
                        Ok(exit) => debug!(team = %team_id, "Live merger exited: {:?}", exit),
                        Err(panic) => error!(team = %team_id, "Live merger panicked: {}", panic),
                    }
                });

                let result = self.periodic().await;
                self.cancel.cancel();
                let _ = live.await;
                result
            }
        };

        self.cancel.cancel();
        resync.finish().await;
        if let Err(e) = dispatcher.await {
            error!(team = %self.team_id, "Work queue dispatcher failed: {}", e);
        }
        result
    }

    /// Periodic passes until cancelled or the credential dies.
    async fn periodic(&self) -> Result<()> {
        let start = Instant::now() + self.config.interval;
        let mut interval = tokio::time::interval_at(start, self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = interval.tick() => {}
            }
            let since = self.config.recent_floor(Utc::now());
            self.pass(Some(since)).await?;
        }
    }

    /// One backfill pass. Only a rejected credential is returned as an
    /// error; cancellation ends the pass quietly and anything else waits
    /// for the next interval.
    async fn pass(&self, since: Option<chrono::DateTime<Utc>>) -> Result<()> {
        match self.backfill.run(since).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_auth() => {
                error!(team = %self.team_id, "Credential rejected, stopping team: {}", e);
                Err(e)
            }
            Err(SyncError::Cancelled) => Ok(()),
            Err(e) => {
                error!(team = %self.team_id, "Sync error: {}", e);
                Ok(())
            }
        }
    }
}

/// Unfloored pass after a reconnect, run beside the work queue so queued
/// bot lookups never wait behind it. At most one runs at a time.
#[derive(Clone)]
struct Resync {
    team_id: String,
    backfill: Backfill,
    running: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Resync {
    fn new(team_id: String, backfill: Backfill) -> Self {
        Self {
            team_id,
            backfill,
            running: Arc::new(Mutex::new(None)),
        }
    }

    fn trigger(&self) {
        let Ok(mut running) = self.running.lock() else {
            return;
        };
        if running.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!(team = %self.team_id, "Resync already running");
            return;
        }

        let backfill = self.backfill.clone();
        let team_id = self.team_id.clone();
        *running = Some(tokio::spawn(async move {
            match guarded(backfill.run(None)).await {
                Ok(Ok(_)) | Ok(Err(SyncError::Cancelled)) => {}
                Ok(Err(e)) => warn!(team = %team_id, "Reconnect resync failed: {}", e),
                Err(panic) => error!(team = %team_id, "Reconnect resync panicked: {}", panic),
            }
        }));
    }

    /// Wait for an in-flight resync to wind down.
    async fn finish(&self) {
        let handle = self.running.lock().ok().and_then(|mut running| running.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// Run `fut`, turning a panic into an error message.
async fn guarded<F: Future>(fut: F) -> std::result::Result<F::Output, String> {
    AssertUnwindSafe(fut).catch_unwind().await.map_err(panic_message)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
