//! Locating the message store inside an account data directory.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{Error, Result};

const MESSAGE_DIR: &str = "db_storage/message";
const SHARDS: [&str; 2] = ["message_0.db", "message_1.db"];

/// Paths derived from an account data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    pub data_dir: PathBuf,
    /// The active message store shard.
    pub store: PathBuf,
    /// The store's write-ahead log, used as the mutation signal.
    pub wal: PathBuf,
}

impl StoreLayout {
    /// Pick the active shard: the newer of the two by modification time,
    /// or the first one when the second does not exist.
    pub fn locate(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let dir = data_dir.join(MESSAGE_DIR);
        let first = dir.join(SHARDS[0]);
        let second = dir.join(SHARDS[1]);

        let store = if !second.exists() {
            if !first.exists() {
                return Err(Error::NotFound(format!(
                    "message store under {}",
                    dir.display()
                )));
            }
            first
        } else if first.exists() && first.metadata()?.modified()? > second.metadata()?.modified()?
        {
            first
        } else {
            second
        };
        debug!(store = %store.display(), "located message store");

        let wal = wal_path(&store);
        Ok(Self {
            data_dir,
            store,
            wal,
        })
    }

    /// The account handle encoded in the data directory name.
    pub fn self_handle(&self) -> Option<String> {
        self_handle_from_dir(&self.data_dir)
    }
}

/// `<store>-wal` next to the store file.
pub fn wal_path(store: &Path) -> PathBuf {
    let mut name = store.as_os_str().to_os_string();
    name.push("-wal");
    PathBuf::from(name)
}

/// Data directories are named `<handle>_<4 chars>`; strip the suffix.
pub fn self_handle_from_dir(data_dir: &Path) -> Option<String> {
    let name = data_dir.file_name()?.to_str()?;
    let cut = name.len().checked_sub(5)?;
    if cut == 0 || !name.is_char_boundary(cut) {
        return None;
    }
    Some(name[..cut].to_string())
}
