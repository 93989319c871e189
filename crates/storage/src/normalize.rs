//! Row to event normalization.

use crate::catalog::TableName;
use crate::content::{decode_body, decode_source};
use crate::event::PackedIdentity;
use crate::{IdentityResolver, MessageStore, MessageType, NormalizedEvent, RawMessageRow, Result};

/// Build the subscriber-facing event for one row.
///
/// Decode and identity misses degrade the event instead of dropping it;
/// only store failures are returned as errors.
pub fn normalize(
    store: &MessageStore,
    resolver: &mut IdentityResolver,
    table: &TableName,
    row: RawMessageRow,
) -> Result<NormalizedEvent> {
    let kind = MessageType::from(row.local_type);
    let is_sender = resolver.is_self(row.sender.as_deref());
    let packed = PackedIdentity::parse(row.packed_info_data.as_deref().unwrap_or_default());
    let dest = resolver.destination(store, &packed, is_sender)?;
    let source = decode_source(row.source.as_deref());

    Ok(NormalizedEvent {
        table: table.clone(),
        id: row.local_id,
        msg_id: row.server_id,
        sequence: row.sort_seq,
        kind,
        is_sender,
        msg: decode_body(kind, row.message_content.as_deref()),
        source: source.tree,
        at_user_list: source.mentions,
        room_wxid: dest.room,
        from_wxid: row.sender,
        to_wxid: dest.counterparty,
        extra: row.packed_info_data,
        status: row.status,
        create_time: row.create_time,
    })
}
