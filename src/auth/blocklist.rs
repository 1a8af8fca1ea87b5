use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BlocklistConfig;

#[derive(Debug, Clone)]
pub struct BlocklistPolicy {
    /// Failures tolerated before an IP is blocked.
    pub max_failures: u32,
    pub initial_block: Duration,
}

impl Default for BlocklistPolicy {
    fn default() -> Self {
        Self {
            max_failures: 10,
            initial_block: Duration::seconds(10),
        }
    }
}

impl From<&BlocklistConfig> for BlocklistPolicy {
    fn from(config: &BlocklistConfig) -> Self {
        Self {
            max_failures: config.max_failures,
            initial_block: Duration::seconds(config.initial_block_secs),
        }
    }
}

/// Failure history of one client IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEntry {
    pub failures: u32,
    pub last_failure: DateTime<Utc>,
    pub block_duration: Duration,
}

impl BlockEntry {
    fn first_failure(now: DateTime<Utc>, initial_block: Duration) -> Self {
        Self {
            failures: 1,
            last_failure: now,
            block_duration: initial_block,
        }
    }

    pub fn release_at(&self) -> DateTime<Utc> {
        self.last_failure + self.block_duration
    }

    fn apply_failure(&mut self, now: DateTime<Utc>) {
        self.failures = self.failures.saturating_add(1);
        self.last_failure = now;
    }

    /// Decides whether the entry blocks at `now`. Once an active block has
    /// elapsed the count restarts and the next block lasts twice as long.
    fn probe(&mut self, now: DateTime<Utc>, max_failures: u32) -> bool {
        if self.failures <= max_failures {
            return false;
        }
        if now < self.release_at() {
            return true;
        }
        self.failures = 0;
        self.block_duration = self.block_duration * 2;
        false
    }
}

/// Per-IP adaptive failure limiter.
///
/// Entries live in a sharded map so unrelated IPs never contend on one lock;
/// each check or update holds only its own entry's shard guard. The whole map
/// is cleared on a fixed interval by [`Blocklist::start_sweeper`] and nothing
/// survives a restart.
pub struct Blocklist {
    entries: DashMap<String, BlockEntry>,
    policy: BlocklistPolicy,
    cancel: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Blocklist {
    pub fn new(policy: BlocklistPolicy) -> Self {
        Self {
            entries: DashMap::new(),
            policy,
            cancel: CancellationToken::new(),
            sweeper: Mutex::new(None),
        }
    }

    pub fn should_block(&self, ip: &str) -> bool {
        self.should_block_at(ip, Utc::now())
    }

    pub fn should_block_at(&self, ip: &str, now: DateTime<Utc>) -> bool {
        let Some(mut entry) = self.entries.get_mut(ip) else {
            return false;
        };
        let blocked = entry.probe(now, self.policy.max_failures);
        if blocked {
            warn!(
                "block ip {}, too many failed attempts. Block time: {}s, release at: {}",
                ip,
                entry.block_duration.num_seconds(),
                entry.release_at().to_rfc3339()
            );
        }
        blocked
    }

    pub fn record_failure(&self, ip: &str) {
        self.record_failure_at(ip, Utc::now());
    }

    pub fn record_failure_at(&self, ip: &str, now: DateTime<Utc>) {
        self.entries
            .entry(ip.to_string())
            .and_modify(|entry| entry.apply_failure(now))
            .or_insert_with(|| BlockEntry::first_failure(now, self.policy.initial_block));
    }

    /// Successful logins leave the failure history untouched; only an elapsed
    /// block or the periodic sweep resets an IP.
    pub fn record_success(&self, _ip: &str) {}

    pub fn entry(&self, ip: &str) -> Option<BlockEntry> {
        self.entries.get(ip).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry and returns how many there were.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries.clear();
        before
    }

    /// Spawns the periodic full sweep. The first sweep runs one `every` after
    /// start. Calling this twice replaces nothing: the first task keeps running.
    pub fn start_sweeper(self: &Arc<Self>, every: StdDuration) {
        let mut slot = match self.sweeper.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.is_some() {
            debug!("blocklist sweeper already running");
            return;
        }

        let blocklist = Arc::clone(self);
        let cancel = self.cancel.clone();
        *slot = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = blocklist.sweep();
                        info!("blocklist sweep removed {} entries", removed);
                    }
                }
            }
            debug!("blocklist sweeper stopped");
        }));
        info!("blocklist sweeper started, interval {:?}", every);
    }

    /// Stops the sweeper and waits for it to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = match self.sweeper.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("blocklist sweeper ended abnormally: {}", e);
            }
        }
    }
}

impl Default for Blocklist {
    fn default() -> Self {
        Self::new(BlocklistPolicy::default())
    }
}
