//! Message rows and the normalized events built from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::TableName;

/// Suffix that marks a handle as a group conversation.
pub const ROOM_SUFFIX: &str = "@chatroom";

/// Whether a handle denotes a group conversation.
pub fn is_room(handle: &str) -> bool {
    handle.ends_with(ROOM_SUFFIX)
}

macro_rules! message_types {
    ($($(#[$meta:meta])* $name:ident = $code:literal,)+) => {
        /// Message type codes as stored in the `local_type` column.
        ///
        /// `All` is never stored; it is the wildcard subscription key.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum MessageType {
            $($(#[$meta])* $name,)+
            /// A code with no named variant.
            Other(i64),
        }

        impl MessageType {
            /// The raw numeric code.
            pub fn code(self) -> i64 {
                match self {
                    $(MessageType::$name => $code,)+
                    MessageType::Other(code) => code,
                }
            }
        }

        impl From<i64> for MessageType {
            fn from(code: i64) -> Self {
                match code {
                    $($code => MessageType::$name,)+
                    other => MessageType::Other(other),
                }
            }
        }
    };
}

message_types! {
    All = 0,
    Text = 1,
    Text2 = 2,
    Image = 3,
    Voice = 34,
    Card = 42,
    Video = 43,
    Emotion = 47,
    Location = 48,
    Voip = 50,
    OpenImCard = 66,
    System = 10000,
    File = 25769803825,
    FileWait = 317827579953,
    Link = 21474836529,
    Link2 = 292057776177,
    Song = 12884901937,
    Link4 = 4294967345,
    Link5 = 326417514545,
    Link6 = 17179869233,
    RedEnvelope = 8594229559345,
    Transfer = 8589934592049,
    Quote = 244813135921,
    MergedForward = 81604378673,
    App = 141733920817,
    App2 = 154618822705,
    WechatVideo = 219043332145,
    Collection = 103079215153,
    /// Pat / nudge.
    Pat = 266287972401,
    GroupAnnouncement = 373662154801,
}

impl From<MessageType> for i64 {
    fn from(kind: MessageType) -> Self {
        kind.code()
    }
}

impl Serialize for MessageType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.code())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        i64::deserialize(deserializer).map(MessageType::from)
    }
}

/// A single row of a conversation table, joined with its sender handle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawMessageRow {
    pub local_id: i64,
    pub server_id: i64,
    pub local_type: i64,
    pub sort_seq: i64,
    pub real_sender_id: i64,
    pub create_time: i64,
    pub status: i64,
    pub upload_status: i64,
    pub download_status: i64,
    pub server_seq: i64,
    pub source: Option<Vec<u8>>,
    pub message_content: Option<Vec<u8>>,
    pub packed_info_data: Option<Vec<u8>>,
    pub sender: Option<String>,
}

/// The four small identity references packed at the start of
/// `packed_info_data`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackedIdentity {
    slots: [Option<i64>; 4],
}

impl PackedIdentity {
    pub fn parse(blob: &[u8]) -> Self {
        let mut slots = [None; 4];
        for (slot, byte) in slots.iter_mut().zip(blob.iter()) {
            *slot = Some(i64::from(*byte));
        }
        Self { slots }
    }

    /// Reference stored in `index` (0..4), if the blob was long enough.
    pub fn slot(&self, index: usize) -> Option<i64> {
        self.slots.get(index).copied().flatten()
    }

    /// The final reference of the blob's first four bytes. A blob shorter
    /// than four bytes yields its own final byte.
    pub fn last(&self) -> Option<i64> {
        self.slots.iter().rev().find_map(|slot| *slot)
    }
}

/// A decoded message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MessageBody {
    /// No content column.
    Empty,
    /// Plain text, either a text message or markup that failed to parse.
    Text(String),
    /// A parsed markup document.
    Markup(serde_json::Value),
    /// Bytes that are not valid UTF-8 after decompression.
    Bytes(Vec<u8>),
}

impl MessageBody {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageBody::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_markup(&self) -> Option<&serde_json::Value> {
        match self {
            MessageBody::Markup(tree) => Some(tree),
            _ => None,
        }
    }
}

/// A message as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedEvent {
    pub table: TableName,
    /// Local sequence id, the ordering key within `table`.
    pub id: i64,
    pub msg_id: i64,
    pub sequence: i64,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub is_sender: bool,
    pub msg: MessageBody,
    pub source: Option<serde_json::Value>,
    pub at_user_list: Vec<String>,
    pub room_wxid: Option<String>,
    pub from_wxid: Option<String>,
    pub to_wxid: Option<String>,
    pub extra: Option<Vec<u8>>,
    pub status: i64,
    pub create_time: i64,
}

impl NormalizedEvent {
    /// Creation time as a UTC timestamp.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.create_time, 0)
    }

    /// The handle of the conversation this message belongs to.
    pub fn conversation(&self) -> Option<&str> {
        self.room_wxid.as_deref().or(self.to_wxid.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_codes_roundtrip() {
        assert_eq!(MessageType::from(1), MessageType::Text);
        assert_eq!(MessageType::from(25769803825), MessageType::File);
        assert_eq!(MessageType::Pat.code(), 266287972401);
        assert_eq!(MessageType::from(7), MessageType::Other(7));
        assert_eq!(i64::from(MessageType::Other(7)), 7);
    }

    #[test]
    fn test_packed_identity_short_blob() {
        let packed = PackedIdentity::parse(&[9, 4]);
        assert_eq!(packed.slot(0), Some(9));
        assert_eq!(packed.slot(1), Some(4));
        assert_eq!(packed.slot(3), None);
        assert_eq!(packed.slot(7), None);
        assert_eq!(packed.last(), Some(4));

        assert_eq!(PackedIdentity::parse(&[1, 2, 3, 4, 5]).last(), Some(4));
        assert_eq!(PackedIdentity::parse(&[]).last(), None);
    }

    #[test]
    fn test_is_room() {
        assert!(is_room("12345@chatroom"));
        assert!(!is_room("wxid_peer"));
    }

    #[test]
    fn test_type_serializes_as_code() {
        let json = serde_json::to_string(&MessageType::Quote).unwrap();
        assert_eq!(json, "244813135921");
    }
}
