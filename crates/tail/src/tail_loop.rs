//! The polling loop that drives discovery, querying, and dispatch.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use storage::{
    normalize, IdentityResolver, MessageStore, NormalizedEvent, SchemaCatalog, TableName,
};
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use crate::bus::{EventBus, Source};
use crate::cursor::{CursorTracker, TableState};
use crate::detector::ChangeDetector;
use crate::dispatch::Dispatcher;
use crate::Result;

/// Default poll period.
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(100);

/// Default window after a change during which every poll scans. Covers
/// coarse filesystem timestamps (two seconds on FAT).
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(2);

/// Starting cursor for tables that appear after startup.
///
/// Tables present at startup always skip their backlog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NewTablePolicy {
    /// Deliver every row of the new table.
    #[default]
    Replay,
    /// Deliver only rows written after discovery.
    Skip,
}

#[derive(Debug, Clone)]
pub struct TailConfig {
    pub period: Duration,
    /// Keep scanning while the mutation signal is younger than this.
    pub settle: Duration,
    pub new_tables: NewTablePolicy,
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
            settle: DEFAULT_SETTLE,
            new_tables: NewTablePolicy::default(),
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

/// What a single poll did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    /// Whether the tables were queried at all.
    pub scanned: bool,
    pub new_tables: usize,
    pub delivered: usize,
}

/// Tails every conversation table and publishes new rows.
pub struct TailLoop {
    store: MessageStore,
    catalog: SchemaCatalog,
    cursors: CursorTracker,
    resolver: IdentityResolver,
    detector: ChangeDetector,
    dispatcher: Dispatcher,
    config: TailConfig,
    started: bool,
}

impl TailLoop {
    pub fn new(
        store: MessageStore,
        resolver: IdentityResolver,
        detector: ChangeDetector,
        bus: Arc<EventBus>,
        source: Arc<Source>,
        config: TailConfig,
    ) -> Result<Self> {
        let dispatcher = Dispatcher::spawn(bus, source, config.workers, config.queue_capacity)?;
        Ok(Self {
            store,
            catalog: SchemaCatalog::new(),
            cursors: CursorTracker::new(),
            resolver,
            detector,
            dispatcher,
            config,
            started: false,
        })
    }

    /// Discover the initial tables and prime each cursor to its current
    /// maximum so history is not replayed. Idempotent.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        // Baseline first: a write racing the priming queries shows up as a
        // change on the next poll.
        self.detector.rearm();
        for table in self.catalog.refresh(&self.store)? {
            let cursor = self.store.max_local_id(&table)?;
            debug!(%table, cursor, "primed cursor");
            self.cursors.track(table, cursor, TableState::Watching);
        }
        self.started = true;
        info!(tables = self.cursors.len(), "message listening");
        Ok(())
    }

    /// Run one iteration: refresh the catalog, then deliver new rows of
    /// every watched table in local-id order.
    ///
    /// Tables are queried when the change signal fired, while it is still
    /// within the settle window, or when a table discovered by the previous
    /// poll is waiting for its first query. Tables discovered here are
    /// queried from the next poll on.
    pub async fn poll_once(&mut self) -> Result<PollStats> {
        self.start()?;

        let mut stats = PollStats::default();
        let changed = self.detector.poll();
        let settling = self.detector.settling(self.config.settle);
        let pending = self.cursors.has_initializing();

        self.cursors.promote_initializing();
        for table in self.catalog.refresh(&self.store)? {
            let cursor = match self.config.new_tables {
                NewTablePolicy::Replay => 0,
                NewTablePolicy::Skip => self.store.max_local_id(&table)?,
            };
            info!(%table, cursor, "new conversation table");
            self.cursors.track(table, cursor, TableState::Initializing);
            stats.new_tables += 1;
        }

        if !(changed || settling || pending) {
            return Ok(stats);
        }
        stats.scanned = true;

        for (table, cursor) in self.cursors.watching() {
            let events = self.collect(&table, cursor)?;
            for event in events {
                if !self.cursors.advance(&table, event.id) {
                    continue;
                }
                debug!(%table, local_id = event.id, kind = event.kind.code(), "new message");
                self.dispatcher.dispatch(event).await?;
                stats.delivered += 1;
            }
        }
        Ok(stats)
    }

    fn collect(&mut self, table: &TableName, cursor: i64) -> Result<Vec<NormalizedEvent>> {
        let rows = self.store.rows_after(table, cursor)?;
        let events = rows
            .into_iter()
            .map(|row| normalize(&self.store, &mut self.resolver, table, row))
            .collect::<storage::Result<Vec<_>>>()?;
        Ok(events)
    }

    /// Poll every period until `shutdown` flips to `true` or its sender is
    /// dropped. Store failures end the loop and are returned.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.start()?;
        let mut ticker = time::interval(self.config.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await?;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("stopping message listener");
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Current cursor of `table`.
    pub fn cursor(&self, table: &TableName) -> Option<i64> {
        self.cursors.cursor(table)
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Stop the dispatch workers after they drain their queues.
    pub async fn shutdown(self) -> Result<()> {
        let dispatcher = self.dispatcher;
        tokio::task::spawn_blocking(move || dispatcher.shutdown())
            .await
            .map_err(|e| crate::Error::Dispatch(e.to_string()))
    }
}
