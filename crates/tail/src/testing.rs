use std::path::PathBuf;

use storage::testing::{create_conversation_table, fixture_store};
use storage::{MessageBody, MessageType, NormalizedEvent, SchemaCatalog, TableName};

use crate::Source;

pub fn source() -> Source {
    Source {
        self_handle: "wxid_me".into(),
        store: PathBuf::from("message_0.db"),
    }
}

/// A catalog-issued table name.
pub fn table(name: &str) -> TableName {
    let store = fixture_store();
    create_conversation_table(&store, name);
    let mut catalog = SchemaCatalog::new();
    catalog.refresh(&store).unwrap();
    catalog.lookup(name).unwrap()
}

pub fn event(id: i64, kind: MessageType) -> NormalizedEvent {
    event_in(&table("Msg_test"), id, kind)
}

pub fn event_in(table: &TableName, id: i64, kind: MessageType) -> NormalizedEvent {
    NormalizedEvent {
        table: table.clone(),
        id,
        msg_id: id * 1000,
        sequence: id,
        kind,
        is_sender: false,
        msg: MessageBody::Text(format!("message {id}")),
        source: None,
        at_user_list: Vec::new(),
        room_wxid: None,
        from_wxid: Some("wxid_peer".into()),
        to_wxid: Some("wxid_me".into()),
        extra: None,
        status: 2,
        create_time: 1_700_000_000 + id,
    }
}
