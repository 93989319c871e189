//! Read-only access to the chat client's message store.

use std::path::Path;

use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};

use crate::catalog::TableName;
use crate::{RawMessageRow, Result};

/// Columns selected for every message query, in [`RawMessageRow`] order.
const MESSAGE_COLUMNS: &str = "m.local_id, m.server_id, m.local_type, m.sort_seq, \
     m.real_sender_id, m.create_time, m.status, m.upload_status, m.download_status, \
     m.server_seq, m.source, m.message_content, m.packed_info_data, n.user_name";

/// Row ordering for [`MessageStore::recent_rows`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Newest,
    Oldest,
}

impl Order {
    fn sql(self) -> &'static str {
        match self {
            Order::Newest => "DESC",
            Order::Oldest => "ASC",
        }
    }
}

/// Handle to an opened message store.
///
/// The store is written by the chat client; this type only reads. Each
/// query runs inside its own short read transaction.
pub struct MessageStore {
    conn: Connection,
}

impl MessageStore {
    /// Open an already-decrypted store read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    /// Open an encrypted store with a raw hex key.
    #[cfg(feature = "sqlcipher")]
    pub fn open_encrypted(path: impl AsRef<Path>, hex_key: &str) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(&format!(
            "PRAGMA key = \"x'{hex_key}'\";
             PRAGMA cipher_page_size = 4096;
             PRAGMA kdf_iter = 256000;
             PRAGMA cipher_hmac_algorithm = HMAC_SHA512;
             PRAGMA cipher_kdf_algorithm = PBKDF2_HMAC_SHA512;"
        ))?;
        Ok(Self { conn })
    }

    /// Wrap a connection opened by the caller.
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside a read transaction that ends before this returns.
    fn read<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let tx = self.conn.unchecked_transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Names of all tables whose name starts with `prefix` (case-sensitive).
    pub(crate) fn table_names_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND substr(name, 1, ?1) = ?2",
            )?;
            let rows = stmt.query_map(params![prefix.len() as i64, prefix], |row| row.get(0))?;
            rows.collect()
        })
    }

    /// Highest local id in `table`, or 0 when empty.
    pub fn max_local_id(&self, table: &TableName) -> Result<i64> {
        self.read(|conn| {
            conn.query_row(
                &format!("SELECT COALESCE(MAX(local_id), 0) FROM {}", table.quoted()),
                [],
                |row| row.get(0),
            )
        })
    }

    /// All rows with a local id greater than `cursor`, ascending.
    pub fn rows_after(&self, table: &TableName, cursor: i64) -> Result<Vec<RawMessageRow>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM {} AS m \
             LEFT JOIN Name2Id AS n ON m.real_sender_id = n.rowid \
             WHERE m.local_id > ?1 ORDER BY m.local_id ASC",
            table.quoted()
        );
        self.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([cursor], raw_row)?;
            rows.collect()
        })
    }

    /// The `limit` newest or oldest rows of `table`, optionally only those
    /// sent by `sender`.
    pub fn recent_rows(
        &self,
        table: &TableName,
        sender: Option<&str>,
        limit: usize,
        order: Order,
    ) -> Result<Vec<RawMessageRow>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM {} AS m \
             LEFT JOIN Name2Id AS n ON m.real_sender_id = n.rowid \
             WHERE (?1 IS NULL OR n.user_name = ?1) \
             ORDER BY m.local_id {} LIMIT ?2",
            table.quoted(),
            order.sql()
        );
        self.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![sender, limit as i64], raw_row)?;
            rows.collect()
        })
    }

    /// Rows of one type sent by `sender` after `since` (unix seconds),
    /// newest first. `content_like` filters the raw content column.
    pub fn sent_rows(
        &self,
        table: &TableName,
        sender: &str,
        local_type: i64,
        content_like: Option<&str>,
        since: i64,
        limit: usize,
    ) -> Result<Vec<RawMessageRow>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM {} AS m \
             LEFT JOIN Name2Id AS n ON m.real_sender_id = n.rowid \
             WHERE m.local_type = ?1 AND n.user_name = ?2 \
             AND (?3 IS NULL OR m.message_content LIKE ?3) \
             AND m.create_time > ?4 \
             ORDER BY m.local_id DESC LIMIT ?5",
            table.quoted()
        );
        let pattern = content_like.map(|c| format!("%{c}%"));
        self.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params![local_type, sender, pattern, since, limit as i64],
                raw_row,
            )?;
            rows.collect()
        })
    }

    /// Handle stored under `row_id` in the identity table.
    pub fn user_name(&self, row_id: i64) -> Result<Option<String>> {
        self.read(|conn| {
            conn.query_row(
                "SELECT user_name FROM Name2Id WHERE rowid = ?1",
                [row_id],
                |row| row.get(0),
            )
            .optional()
        })
    }
}

fn raw_row(row: &Row<'_>) -> rusqlite::Result<RawMessageRow> {
    Ok(RawMessageRow {
        local_id: int_column(row, 0)?,
        server_id: int_column(row, 1)?,
        local_type: int_column(row, 2)?,
        sort_seq: int_column(row, 3)?,
        real_sender_id: int_column(row, 4)?,
        create_time: int_column(row, 5)?,
        status: int_column(row, 6)?,
        upload_status: int_column(row, 7)?,
        download_status: int_column(row, 8)?,
        server_seq: int_column(row, 9)?,
        source: bytes_column(row, 10)?,
        message_content: bytes_column(row, 11)?,
        packed_info_data: bytes_column(row, 12)?,
        sender: row.get(13)?,
    })
}

fn int_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<i64> {
    Ok(row.get::<_, Option<i64>>(idx)?.unwrap_or_default())
}

/// Content columns hold TEXT when stored plain and BLOB when compressed.
fn bytes_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Vec<u8>>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => None,
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => Some(bytes.to_vec()),
        ValueRef::Integer(i) => Some(i.to_string().into_bytes()),
        ValueRef::Real(f) => Some(f.to_string().into_bytes()),
    })
}
