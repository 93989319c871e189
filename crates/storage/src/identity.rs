//! Identity resolution: numeric references to stable handles.

use std::collections::HashMap;

use tracing::debug;

use crate::event::{is_room, PackedIdentity};
use crate::{MessageStore, Result};

/// Where a message was sent: a group room or a one-to-one counterparty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Destination {
    pub room: Option<String>,
    pub counterparty: Option<String>,
}

/// Resolves identity-table row ids to handles, memoizing hits.
///
/// Row ids are never reassigned, so cached entries stay valid for the
/// lifetime of the store. Misses are not cached.
#[derive(Debug)]
pub struct IdentityResolver {
    self_handle: String,
    cache: HashMap<i64, String>,
}

impl IdentityResolver {
    pub fn new(self_handle: impl Into<String>) -> Self {
        Self {
            self_handle: self_handle.into(),
            cache: HashMap::new(),
        }
    }

    /// The local account's own handle.
    pub fn self_handle(&self) -> &str {
        &self.self_handle
    }

    /// Look up `row_id`; `None` means unknown, not deleted.
    pub fn resolve(&mut self, store: &MessageStore, row_id: i64) -> Result<Option<String>> {
        if let Some(handle) = self.cache.get(&row_id) {
            return Ok(Some(handle.clone()));
        }
        let handle = store.user_name(row_id)?;
        match &handle {
            Some(handle) => {
                self.cache.insert(row_id, handle.clone());
            }
            None => debug!(row_id, "no identity mapping"),
        }
        Ok(handle)
    }

    /// Whether `sender` is the local account.
    pub fn is_self(&self, sender: Option<&str>) -> bool {
        sender == Some(self.self_handle.as_str())
    }

    /// Work out the room or counterparty from the packed identity slots.
    ///
    /// The slot layout depends on direction: outgoing messages carry the
    /// conversation in the last slot, incoming ones carry a room in slot 1
    /// and the counterparty in the last slot.
    pub fn destination(
        &mut self,
        store: &MessageStore,
        packed: &PackedIdentity,
        sender_is_self: bool,
    ) -> Result<Destination> {
        let mut dest = Destination::default();
        if sender_is_self {
            if let Some(handle) = self.resolve_ref(store, packed.last())? {
                if is_room(&handle) {
                    dest.room = Some(handle);
                } else {
                    dest.counterparty = Some(handle);
                }
            }
        } else {
            match self.resolve_ref(store, packed.slot(1))? {
                Some(handle) if is_room(&handle) => dest.room = Some(handle),
                _ => dest.counterparty = self.resolve_ref(store, packed.last())?,
            }
        }
        Ok(dest)
    }

    fn resolve_ref(&mut self, store: &MessageStore, row_id: Option<i64>) -> Result<Option<String>> {
        match row_id {
            Some(row_id) => self.resolve(store, row_id),
            None => Ok(None),
        }
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture_store, insert_user};

    #[test]
    fn test_resolve_memoizes_hits_only() {
        let store = fixture_store();
        let id = insert_user(&store, "wxid_peer") as u8;
        let mut resolver = IdentityResolver::new("wxid_me");

        assert_eq!(resolver.resolve(&store, 42).unwrap(), None);
        assert_eq!(resolver.cached(), 0);
        assert_eq!(
            resolver.resolve(&store, i64::from(id)).unwrap().as_deref(),
            Some("wxid_peer")
        );
        assert_eq!(resolver.cached(), 1);

        // Cached entries survive the row disappearing.
        store.connection().execute("DELETE FROM Name2Id", []).unwrap();
        assert_eq!(
            resolver.resolve(&store, i64::from(id)).unwrap().as_deref(),
            Some("wxid_peer")
        );
    }

    #[test]
    fn test_outgoing_to_peer() {
        let store = fixture_store();
        let me = insert_user(&store, "wxid_me") as u8;
        let peer = insert_user(&store, "wxid_peer") as u8;
        let mut resolver = IdentityResolver::new("wxid_me");

        let packed = PackedIdentity::parse(&[me, 0, 0, peer]);
        let dest = resolver.destination(&store, &packed, true).unwrap();
        assert_eq!(dest.counterparty.as_deref(), Some("wxid_peer"));
        assert_eq!(dest.room, None);
    }

    #[test]
    fn test_outgoing_to_room() {
        let store = fixture_store();
        let room = insert_user(&store, "123@chatroom") as u8;
        let mut resolver = IdentityResolver::new("wxid_me");

        let packed = PackedIdentity::parse(&[0, 0, 0, room]);
        let dest = resolver.destination(&store, &packed, true).unwrap();
        assert_eq!(dest.room.as_deref(), Some("123@chatroom"));
        assert_eq!(dest.counterparty, None);
    }

    #[test]
    fn test_short_blob_uses_final_byte() {
        let store = fixture_store();
        let peer = insert_user(&store, "wxid_peer") as u8;
        let mut resolver = IdentityResolver::new("wxid_me");

        let packed = PackedIdentity::parse(&[0, peer]);
        let dest = resolver.destination(&store, &packed, true).unwrap();
        assert_eq!(dest.counterparty.as_deref(), Some("wxid_peer"));
    }

    #[test]
    fn test_incoming_from_room_ignores_slot_three() {
        let store = fixture_store();
        let room = insert_user(&store, "123@chatroom") as u8;
        let me = insert_user(&store, "wxid_me") as u8;
        let mut resolver = IdentityResolver::new("wxid_me");

        let packed = PackedIdentity::parse(&[0, room, 0, me]);
        let dest = resolver.destination(&store, &packed, false).unwrap();
        assert_eq!(dest.room.as_deref(), Some("123@chatroom"));
        assert_eq!(dest.counterparty, None);
    }

    #[test]
    fn test_incoming_direct_uses_slot_three() {
        let store = fixture_store();
        let peer = insert_user(&store, "wxid_peer") as u8;
        let me = insert_user(&store, "wxid_me") as u8;
        let mut resolver = IdentityResolver::new("wxid_me");

        let packed = PackedIdentity::parse(&[0, peer, 0, me]);
        let dest = resolver.destination(&store, &packed, false).unwrap();
        assert_eq!(dest.counterparty.as_deref(), Some("wxid_me"));
        assert_eq!(dest.room, None);
    }

    #[test]
    fn test_unresolvable_slots_leave_both_unset() {
        let store = fixture_store();
        let mut resolver = IdentityResolver::new("wxid_me");
        let packed = PackedIdentity::parse(&[]);
        assert_eq!(
            resolver.destination(&store, &packed, false).unwrap(),
            Destination::default()
        );
    }

    #[test]
    fn test_is_self_compares_handles() {
        let resolver = IdentityResolver::new("wxid_me");
        assert!(resolver.is_self(Some("wxid_me")));
        assert!(!resolver.is_self(Some("wxid_other")));
        assert!(!resolver.is_self(None));
    }
}
