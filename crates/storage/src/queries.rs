//! Ad-hoc lookups over the conversation tables.
//!
//! These helpers exist for bots that need to confirm their own outgoing
//! messages landed (for example after sending an image, find the row that
//! carries its md5).

use std::collections::HashMap;

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use crate::catalog::TableName;
use crate::normalize::normalize;
use crate::store::Order;
use crate::{
    IdentityResolver, MessageStore, MessageType, NormalizedEvent, RawMessageRow, Result,
    SchemaCatalog,
};

/// Read-side helpers bundled with the state they need.
pub struct Lookup<'a> {
    store: &'a MessageStore,
    resolver: &'a mut IdentityResolver,
    catalog: &'a SchemaCatalog,
    tables_by_handle: &'a mut HashMap<String, TableName>,
}

impl<'a> Lookup<'a> {
    pub fn new(
        store: &'a MessageStore,
        resolver: &'a mut IdentityResolver,
        catalog: &'a SchemaCatalog,
        tables_by_handle: &'a mut HashMap<String, TableName>,
    ) -> Self {
        Self {
            store,
            resolver,
            catalog,
            tables_by_handle,
        }
    }

    fn normalize_all(
        &mut self,
        table: &TableName,
        rows: Vec<RawMessageRow>,
    ) -> Result<Vec<NormalizedEvent>> {
        rows.into_iter()
            .map(|row| normalize(self.store, self.resolver, table, row))
            .collect()
    }

    /// The `count` newest (or oldest) messages of `table`.
    pub fn recent_messages(
        &mut self,
        table: &TableName,
        count: usize,
        order: Order,
    ) -> Result<Vec<NormalizedEvent>> {
        let rows = self.store.recent_rows(table, None, count, order)?;
        self.normalize_all(table, rows)
    }

    /// The `count` newest messages of `table` sent by `sender`.
    pub fn recent_messages_from(
        &mut self,
        table: &TableName,
        sender: &str,
        count: usize,
    ) -> Result<Vec<NormalizedEvent>> {
        let rows = self
            .store
            .recent_rows(table, Some(sender), count, Order::Newest)?;
        self.normalize_all(table, rows)
    }

    /// Find the conversation table holding the conversation with `handle`.
    ///
    /// Scans each table's newest own message and records the room or
    /// counterparty it went to. Hits are remembered across calls.
    pub fn table_for_handle(&mut self, handle: &str) -> Result<Option<TableName>> {
        if let Some(table) = self.tables_by_handle.get(handle) {
            return Ok(Some(table.clone()));
        }
        let catalog = self.catalog;
        let self_handle = self.resolver.self_handle().to_string();
        for table in catalog.tables() {
            let rows = self.store.recent_rows(table, Some(&self_handle), 1, Order::Newest)?;
            let Some(row) = rows.into_iter().next() else {
                continue;
            };
            let event = normalize(self.store, self.resolver, table, row)?;
            let Some(key) = event.room_wxid.or(event.to_wxid) else {
                continue;
            };
            self.tables_by_handle.insert(key, table.clone());
        }
        let found = self.tables_by_handle.get(handle).cloned();
        debug!(handle, found = found.is_some(), "conversation table lookup");
        Ok(found)
    }

    fn sent(
        &mut self,
        to: &str,
        kind: MessageType,
        content_like: Option<&str>,
        within_secs: i64,
        limit: usize,
    ) -> Result<Vec<NormalizedEvent>> {
        let Some(table) = self.table_for_handle(to)? else {
            return Ok(Vec::new());
        };
        let since = Utc::now().timestamp() - within_secs;
        let self_handle = self.resolver.self_handle().to_string();
        let rows =
            self.store
                .sent_rows(&table, &self_handle, kind.code(), content_like, since, limit)?;
        self.normalize_all(&table, rows)
    }

    /// Own text messages to `to` containing `content`, newest first.
    pub fn find_sent_text(
        &mut self,
        to: &str,
        content: &str,
        within_secs: i64,
        limit: usize,
    ) -> Result<Vec<NormalizedEvent>> {
        self.sent(to, MessageType::Text, Some(content), within_secs, limit)
    }

    /// Own image messages to `to` whose payload carries `md5`.
    pub fn find_sent_image(
        &mut self,
        to: &str,
        md5: &str,
        within_secs: i64,
        limit: usize,
    ) -> Result<Vec<NormalizedEvent>> {
        let events = self.sent(to, MessageType::Image, None, within_secs, limit)?;
        Ok(filter_md5(events, "/msg/img/@md5", md5))
    }

    /// Own file messages to `to` whose payload carries `md5`.
    pub fn find_sent_file(
        &mut self,
        to: &str,
        md5: &str,
        within_secs: i64,
        limit: usize,
    ) -> Result<Vec<NormalizedEvent>> {
        let events = self.sent(to, MessageType::File, None, within_secs, limit)?;
        Ok(filter_md5(events, "/msg/appmsg/md5", md5))
    }
}

fn filter_md5(events: Vec<NormalizedEvent>, pointer: &str, md5: &str) -> Vec<NormalizedEvent> {
    events
        .into_iter()
        .filter(|event| {
            event
                .msg
                .as_markup()
                .and_then(|tree| tree.pointer(pointer))
                .and_then(Value::as_str)
                == Some(md5)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        compress, create_conversation_table, fixture_store, insert_row, insert_user, RowSpec,
    };

    struct Fixture {
        store: MessageStore,
        resolver: IdentityResolver,
        catalog: SchemaCatalog,
        index: HashMap<String, TableName>,
    }

    impl Fixture {
        fn lookup(&mut self) -> Lookup<'_> {
            Lookup::new(&self.store, &mut self.resolver, &self.catalog, &mut self.index)
        }
    }

    fn fixture() -> (Fixture, TableName, i64) {
        let store = fixture_store();
        let me = insert_user(&store, "wxid_me");
        let peer = insert_user(&store, "wxid_peer") as u8;
        create_conversation_table(&store, "Msg_peer");
        create_conversation_table(&store, "Msg_idle");
        let mut catalog = SchemaCatalog::new();
        catalog.refresh(&store).unwrap();
        let table = catalog.lookup("Msg_peer").unwrap();

        let now = Utc::now().timestamp();
        insert_row(
            &store,
            &table,
            &RowSpec::text(1, "ping").sender(me).packed([0, 0, 0, peer]).created(now),
        );
        insert_row(
            &store,
            &table,
            &RowSpec::new(2, MessageType::Image.code())
                .sender(me)
                .packed([0, 0, 0, peer])
                .content(compress(r#"<msg><img md5="aa11"/></msg>"#))
                .created(now),
        );
        insert_row(
            &store,
            &table,
            &RowSpec::new(3, MessageType::File.code())
                .sender(me)
                .packed([0, 0, 0, peer])
                .content(compress("<msg><appmsg><md5>ff00</md5></appmsg></msg>"))
                .created(now),
        );
        insert_row(
            &store,
            &table,
            &RowSpec::text(4, "old ping")
                .sender(me)
                .packed([0, 0, 0, peer])
                .created(now - 3600),
        );

        let fixture = Fixture {
            store,
            resolver: IdentityResolver::new("wxid_me"),
            catalog,
            index: HashMap::new(),
        };
        (fixture, table, me)
    }

    #[test]
    fn test_recent_messages_order() {
        let (mut fx, table, _) = fixture();
        let newest = fx.lookup().recent_messages(&table, 2, Order::Newest).unwrap();
        let ids: Vec<_> = newest.iter().map(|e| e.id).collect();
        assert_eq!(ids, [4, 3]);

        let oldest = fx.lookup().recent_messages(&table, 1, Order::Oldest).unwrap();
        assert_eq!(oldest[0].id, 1);

        let mine = fx.lookup().recent_messages_from(&table, "wxid_me", 10).unwrap();
        assert_eq!(mine.len(), 4);
    }

    #[test]
    fn test_table_for_handle_maps_counterparty() {
        let (mut fx, table, _) = fixture();
        let found = fx.lookup().table_for_handle("wxid_peer").unwrap();
        assert_eq!(found, Some(table.clone()));
        assert_eq!(fx.index.get("wxid_peer"), Some(&table));

        // The own handle is never a conversation key.
        assert_eq!(fx.lookup().table_for_handle("wxid_me").unwrap(), None);
        assert_eq!(fx.lookup().table_for_handle("wxid_nobody").unwrap(), None);
    }

    #[test]
    fn test_table_for_handle_maps_room() {
        let (mut fx, _, me) = fixture();
        let room = insert_user(&fx.store, "4242@chatroom") as u8;
        create_conversation_table(&fx.store, "Msg_room");
        fx.catalog.refresh(&fx.store).unwrap();
        let room_table = fx.catalog.lookup("Msg_room").unwrap();
        insert_row(
            &fx.store,
            &room_table,
            &RowSpec::text(1, "hello all").sender(me).packed([0, 0, 0, room]),
        );

        let found = fx.lookup().table_for_handle("4242@chatroom").unwrap();
        assert_eq!(found, Some(room_table));
    }

    #[test]
    fn test_find_sent_messages() {
        let (mut fx, _, _) = fixture();

        let texts = fx.lookup().find_sent_text("wxid_peer", "ping", 60, 10).unwrap();
        let ids: Vec<_> = texts.iter().map(|e| e.id).collect();
        assert_eq!(ids, [1]);

        let images = fx.lookup().find_sent_image("wxid_peer", "aa11", 60, 10).unwrap();
        assert_eq!(images.len(), 1);
        assert!(fx.lookup().find_sent_image("wxid_peer", "zz", 60, 10).unwrap().is_empty());

        let files = fx.lookup().find_sent_file("wxid_peer", "ff00", 60, 10).unwrap();
        assert_eq!(files[0].id, 3);

        assert!(fx.lookup().find_sent_text("wxid_stranger", "ping", 60, 10).unwrap().is_empty());
    }
}
