//! Node-local room membership.
//!
//! Tracks which connections attached to this node want which class of
//! notification. Nothing here is replicated: after a restart the index is
//! empty and is rebuilt as clients reconnect and resubscribe.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use confmesh_store::{ConnectionId, ModuleId};
use dashmap::DashMap;

use crate::connection::Session;

/// A class of notification connections can subscribe to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Room {
    /// Changes to the active config of a module. Joined by the module itself.
    ConfigChanging(ModuleId),
    /// Changes to the backend list of a module. Joined by its dependents.
    BackendsChanging(ModuleId),
    /// Changes to the cluster routing table.
    RoutingChanging,
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::ConfigChanging(id) => write!(f, "config:{}", id),
            Room::BackendsChanging(id) => write!(f, "backends:{}", id),
            Room::RoutingChanging => f.write_str("routing"),
        }
    }
}

/// Registry of live connections and their room memberships.
///
/// Both maps are sharded, so joins and lookups on different rooms do not
/// contend on one lock.
#[derive(Default)]
pub struct RoomIndex {
    /// Live connections indexed by id.
    sessions: DashMap<ConnectionId, Arc<Session>>,
    /// Index: room -> member connection ids.
    rooms: DashMap<Room, HashSet<ConnectionId>>,
}

impl RoomIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a live connection.
    pub fn register(&self, session: Arc<Session>) {
        self.sessions.insert(session.id().clone(), session);
    }

    /// Removes a connection and all of its memberships.
    pub fn unregister(&self, id: &ConnectionId) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(id).map(|(_, s)| s);
        self.rooms.retain(|_, members| {
            members.remove(id);
            !members.is_empty()
        });
        removed
    }

    /// Returns true if the connection is attached to this node.
    pub fn is_connected(&self, id: &ConnectionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Adds a registered connection to a room. Returns false if the
    /// connection is not registered (already gone).
    ///
    /// Registration is checked again after the insert: an `unregister`
    /// that ran in between has already swept the rooms, so the membership
    /// is undone here instead of outliving the connection.
    pub fn join(&self, room: Room, id: &ConnectionId) -> bool {
        if !self.sessions.contains_key(id) {
            return false;
        }
        self.rooms.entry(room.clone()).or_default().insert(id.clone());
        if !self.sessions.contains_key(id) {
            self.leave(&room, id);
            return false;
        }
        true
    }

    /// Removes a connection from a room. Returns true if it was a member.
    pub fn leave(&self, room: &Room, id: &ConnectionId) -> bool {
        let removed = match self.rooms.get_mut(room) {
            Some(mut members) => members.remove(id),
            None => false,
        };
        self.rooms.remove_if(room, |_, members| members.is_empty());
        removed
    }

    /// Returns the live sessions currently in a room.
    pub fn members(&self, room: &Room) -> Vec<Arc<Session>> {
        let ids: Vec<ConnectionId> = match self.rooms.get(room) {
            Some(members) => members.iter().cloned().collect(),
            None => return Vec::new(),
        };
        ids.iter()
            .filter_map(|id| self.sessions.get(id).map(|s| Arc::clone(s.value())))
            .collect()
    }

    /// Returns true if the connection is a member of the room.
    pub fn is_member(&self, room: &Room, id: &ConnectionId) -> bool {
        self.rooms
            .get(room)
            .map(|members| members.contains(id))
            .unwrap_or(false)
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of non-empty rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::session;

    #[test]
    fn test_join_requires_registration() {
        let index = RoomIndex::new();
        let (s, _rx) = session("c1");
        assert!(!index.join(Room::RoutingChanging, s.id()));

        index.register(s.clone());
        assert!(index.join(Room::RoutingChanging, s.id()));
        assert!(index.is_member(&Room::RoutingChanging, s.id()));
    }

    #[test]
    fn test_members_per_room() {
        let index = RoomIndex::new();
        let a = ModuleId::from_name("a");
        let b = ModuleId::from_name("b");
        let (s1, _r1) = session("c1");
        let (s2, _r2) = session("c2");
        index.register(s1.clone());
        index.register(s2.clone());

        index.join(Room::BackendsChanging(a), s1.id());
        index.join(Room::BackendsChanging(a), s2.id());
        index.join(Room::BackendsChanging(b), s2.id());

        assert_eq!(index.members(&Room::BackendsChanging(a)).len(), 2);
        assert_eq!(index.members(&Room::BackendsChanging(b)).len(), 1);
        assert!(index.members(&Room::ConfigChanging(a)).is_empty());
    }

    #[test]
    fn test_unregister_leaves_every_room() {
        let index = RoomIndex::new();
        let a = ModuleId::from_name("a");
        let (s1, _r1) = session("c1");
        index.register(s1.clone());
        index.join(Room::ConfigChanging(a), s1.id());
        index.join(Room::RoutingChanging, s1.id());
        assert_eq!(index.room_count(), 2);

        assert!(index.unregister(s1.id()).is_some());
        assert!(!index.is_connected(s1.id()));
        assert_eq!(index.room_count(), 0);
        assert!(index.members(&Room::RoutingChanging).is_empty());
    }

    #[test]
    fn test_leave_drops_empty_room() {
        let index = RoomIndex::new();
        let (s1, _r1) = session("c1");
        index.register(s1.clone());
        index.join(Room::RoutingChanging, s1.id());

        assert!(index.leave(&Room::RoutingChanging, s1.id()));
        assert!(!index.leave(&Room::RoutingChanging, s1.id()));
        assert_eq!(index.room_count(), 0);
        assert!(index.is_connected(s1.id()));
    }

    #[test]
    fn test_join_racing_unregister_leaves_no_membership() {
        let index = RoomIndex::new();
        let a = ModuleId::from_name("a");
        for round in 0..200 {
            let (s, _rx) = session(&format!("c{round}"));
            index.register(s.clone());
            std::thread::scope(|scope| {
                scope.spawn(|| {
                    for _ in 0..50 {
                        index.join(Room::BackendsChanging(a), s.id());
                        index.join(Room::RoutingChanging, s.id());
                    }
                });
                scope.spawn(|| {
                    index.unregister(s.id());
                });
            });
            assert!(!index.is_connected(s.id()));
            assert!(!index.is_member(&Room::BackendsChanging(a), s.id()));
            assert!(!index.is_member(&Room::RoutingChanging, s.id()));
            assert_eq!(index.room_count(), 0);
        }
    }

    #[test]
    fn test_room_names() {
        let a = ModuleId::from_name("a");
        assert_eq!(Room::RoutingChanging.to_string(), "routing");
        assert_eq!(Room::ConfigChanging(a).to_string(), format!("config:{}", a));
        assert_eq!(
            Room::BackendsChanging(a).to_string(),
            format!("backends:{}", a)
        );
    }
}
