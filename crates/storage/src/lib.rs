//! Read-side access to a chat client's local message store.
//!
//! The client keeps one table per conversation (`Msg_<hash>`) plus an
//! identity table (`Name2Id`) that maps small integer references to stable
//! handles. This crate turns rows of those tables into [`NormalizedEvent`]s.
//!
//! # Core Concepts
//!
//! ## MessageStore
//!
//! [`MessageStore`] wraps an already-decrypted SQLite connection. It only
//! reads; each query runs in its own short transaction.
//!
//! ## SchemaCatalog
//!
//! [`SchemaCatalog`] lists conversation tables and reports new ones. Table
//! names are only ever interpolated into SQL as [`TableName`]s, which can
//! only come from the catalog.
//!
//! ## IdentityResolver
//!
//! [`IdentityResolver`] maps identity references to handles and works out
//! whether a message went to a room or to a single counterparty.
//!
//! ## Content decoding
//!
//! The [`content`] module decompresses payloads (zstd, best effort) and
//! parses markup bodies into JSON trees.
//!
//! # Example
//!
//! ```no_run
//! use storage::{normalize, IdentityResolver, MessageStore, SchemaCatalog};
//!
//! let store = MessageStore::open("message_0.db")?;
//! let mut catalog = SchemaCatalog::new();
//! let mut resolver = IdentityResolver::new("wxid_me");
//!
//! for table in catalog.refresh(&store)? {
//!     for row in store.rows_after(&table, 0)? {
//!         let event = normalize(&store, &mut resolver, &table, row)?;
//!         println!("{} {:?}", event.id, event.msg);
//!     }
//! }
//! # Ok::<(), storage::Error>(())
//! ```

mod catalog;
pub mod content;
mod error;
mod event;
mod identity;
mod layout;
mod normalize;
mod queries;
mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use catalog::{discover_new, SchemaCatalog, TableName, TABLE_PREFIX};
pub use error::{Error, Result};
pub use event::{
    is_room, MessageBody, MessageType, NormalizedEvent, PackedIdentity, RawMessageRow,
    ROOM_SUFFIX,
};
pub use identity::{Destination, IdentityResolver};
pub use layout::{self_handle_from_dir, wal_path, StoreLayout};
pub use normalize::normalize;
pub use queries::Lookup;
pub use store::{MessageStore, Order};
