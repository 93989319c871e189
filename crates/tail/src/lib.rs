//! Live tailing of a chat client's message store.
//!
//! [`TailLoop`] watches the store's write-ahead log, queries conversation
//! tables for rows past each table's cursor, and hands normalized events to
//! an [`EventBus`] through a bounded [`Dispatcher`].
//!
//! # Core Concepts
//!
//! ## ChangeDetector
//!
//! One modification-time check on the shared log decides whether a poll
//! queries anything at all.
//!
//! ## CursorTracker
//!
//! Per-table high-water marks. A row is delivered at most once: the cursor
//! advances before the event is queued.
//!
//! ## EventBus
//!
//! Handlers subscribe to one message type or to every event. Wildcard
//! handlers run first. Handler failures are logged and do not affect other
//! handlers or the loop.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use storage::{IdentityResolver, MessageStore, StoreLayout};
//! use tail::{ChangeDetector, EventBus, EventKey, Source, TailConfig, TailLoop};
//!
//! # async fn example() -> tail::Result<()> {
//! let layout = StoreLayout::locate("/data/wxid_me_ab12")?;
//! let bus = Arc::new(EventBus::new());
//! bus.subscribe(EventKey::All, false, |_, event| {
//!     println!("{}: {:?}", event.id, event.msg);
//!     Ok(())
//! });
//!
//! let source = Source {
//!     self_handle: "wxid_me".into(),
//!     store: layout.store.clone(),
//! };
//! let mut tail = TailLoop::new(
//!     MessageStore::open(&layout.store)?,
//!     IdentityResolver::new("wxid_me"),
//!     ChangeDetector::new(&layout.wal),
//!     bus,
//!     Arc::new(source),
//!     TailConfig::default(),
//! )?;
//!
//! let (_stop, shutdown) = tokio::sync::watch::channel(false);
//! tail.run(shutdown).await?;
//! tail.shutdown().await
//! # }
//! ```

mod bus;
mod cursor;
mod detector;
mod dispatch;
mod error;
mod tail_loop;

#[cfg(test)]
mod testing;

pub use bus::{EventBus, EventKey, HandlerError, HandlerResult, Source, SubscriptionId};
pub use cursor::{CursorTracker, TableState};
pub use detector::ChangeDetector;
pub use dispatch::Dispatcher;
pub use error::{Error, Result};
pub use tail_loop::{
    NewTablePolicy, PollStats, TailConfig, TailLoop, DEFAULT_PERIOD, DEFAULT_SETTLE,
};
