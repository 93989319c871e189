//! In-memory message store fixtures for tests.

use rusqlite::types::Value;
use rusqlite::{params, Connection};

use crate::{MessageStore, TableName};

/// An in-memory store with an empty identity table.
pub fn fixture_store() -> MessageStore {
    let conn = Connection::open_in_memory().expect("open in-memory database");
    conn.execute_batch(
        "CREATE TABLE Name2Id (user_name TEXT PRIMARY KEY, is_session INTEGER DEFAULT 0);",
    )
    .expect("create Name2Id");
    MessageStore::from_connection(conn)
}

/// Create a conversation table with the client's column layout.
pub fn create_conversation_table(store: &MessageStore, name: &str) {
    store
        .connection()
        .execute_batch(&format!(
            "CREATE TABLE \"{name}\" (
                local_id INTEGER PRIMARY KEY AUTOINCREMENT,
                server_id INTEGER,
                local_type INTEGER,
                sort_seq INTEGER,
                real_sender_id INTEGER,
                create_time INTEGER,
                status INTEGER,
                upload_status INTEGER,
                download_status INTEGER,
                server_seq INTEGER,
                origin_source INTEGER,
                source TEXT,
                message_content TEXT,
                compress_content TEXT,
                packed_info_data BLOB,
                WCDB_CT_message_content INTEGER DEFAULT NULL,
                WCDB_CT_source INTEGER DEFAULT NULL
            );"
        ))
        .expect("create conversation table");
}

/// Add a handle to the identity table and return its row id.
pub fn insert_user(store: &MessageStore, handle: &str) -> i64 {
    let conn = store.connection();
    conn.execute("INSERT INTO Name2Id (user_name) VALUES (?1)", [handle])
        .expect("insert user");
    conn.last_insert_rowid()
}

/// A row to insert into a conversation table.
#[derive(Debug, Clone)]
pub struct RowSpec {
    pub local_id: i64,
    pub local_type: i64,
    pub sender: i64,
    pub create_time: i64,
    pub content: Option<Vec<u8>>,
    pub source: Option<Vec<u8>>,
    pub packed: Option<Vec<u8>>,
}

impl RowSpec {
    pub fn new(local_id: i64, local_type: i64) -> Self {
        Self {
            local_id,
            local_type,
            sender: 0,
            create_time: 1_700_000_000 + local_id,
            content: None,
            source: None,
            packed: None,
        }
    }

    pub fn text(local_id: i64, text: &str) -> Self {
        Self::new(local_id, 1).content(text.as_bytes())
    }

    pub fn sender(mut self, row_id: i64) -> Self {
        self.sender = row_id;
        self
    }

    pub fn content(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.content = Some(bytes.into());
        self
    }

    pub fn source(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.source = Some(bytes.into());
        self
    }

    /// Packed identity blob with the given slot references.
    pub fn packed(mut self, slots: [u8; 4]) -> Self {
        self.packed = Some(slots.to_vec());
        self
    }

    pub fn created(mut self, unix_secs: i64) -> Self {
        self.create_time = unix_secs;
        self
    }
}

/// Insert `row` into `table`.
pub fn insert_row(store: &MessageStore, table: &TableName, row: &RowSpec) {
    store
        .connection()
        .execute(
            &format!(
                "INSERT INTO {} (local_id, server_id, local_type, sort_seq, real_sender_id,
                    create_time, status, upload_status, download_status, server_seq,
                    source, message_content, packed_info_data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 2, 0, 0, 0, ?7, ?8, ?9)",
                table.quoted()
            ),
            params![
                row.local_id,
                row.local_id * 1000,
                row.local_type,
                row.local_id * 1000,
                row.sender,
                row.create_time,
                column_value(&row.source),
                column_value(&row.content),
                row.packed,
            ],
        )
        .expect("insert message row");
}

/// Plain payloads are stored as TEXT and compressed ones as BLOB.
fn column_value(bytes: &Option<Vec<u8>>) -> Value {
    match bytes {
        None => Value::Null,
        Some(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => Value::Text(text.to_string()),
            Err(_) => Value::Blob(bytes.clone()),
        },
    }
}

/// Compress `text` the way the client stores large payloads.
pub fn compress(text: &str) -> Vec<u8> {
    zstd::encode_all(text.as_bytes(), 3).expect("zstd encode")
}
