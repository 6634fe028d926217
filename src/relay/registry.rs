use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::peer::{PeerHandle, PeerId, PeerSession};
use super::signaling::{Payload, ServerMessage};
use crate::error::{RelayError, Result};

#[derive(Debug, Default)]
struct Room {
    members: HashMap<PeerId, PeerHandle>,
    /// Set when the last member leaves and the entry is removed from the
    /// map. A join that raced the removal must retry on a fresh entry.
    closed: bool,
}

impl Room {
    /// Enqueues `message` for every member except `except`.
    fn broadcast(&self, message: &ServerMessage, except: Option<PeerId>) -> (usize, usize) {
        let mut delivered = 0;
        let mut skipped = 0;

        for member in self.members.values() {
            if Some(member.id()) == except {
                continue;
            }
            if member.deliver(message.clone()).is_queued() {
                delivered += 1;
            } else {
                skipped += 1;
            }
        }

        (delivered, skipped)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Room size after the join, the joiner included
    pub count: usize,
    /// Existing members that were sent `new-peer`
    pub notified: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalOutcome {
    pub delivered: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub room_id: String,
    pub remaining: usize,
    pub room_closed: bool,
}

/// Room membership and message fan-out.
///
/// The map lock is only held to look up, create or remove an entry. Every
/// membership change and every broadcast happens under that room's own
/// mutex, so operations on one room are serialized while different rooms
/// proceed in parallel. Outbound sends never wait, so holding a room lock
/// across a broadcast never blocks on a slow peer.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Mutex<Room>>>>,
}

impl RoomRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn get_room(&self, room_id: &str) -> Option<Arc<Mutex<Room>>> {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).cloned()
    }

    /// Joins `session` to `room_id`, creating the room if needed.
    ///
    /// The joiner is told the room size first, then every existing member
    /// is told about the joiner, then the joiner is inserted.
    pub async fn join(&self, session: &mut PeerSession, room_id: &str) -> Result<JoinOutcome> {
        if room_id.is_empty() {
            return Err(RelayError::EmptyRoomId);
        }

        if let Some(current) = session.room_id() {
            return Err(RelayError::AlreadyJoined {
                peer_id: session.id().to_string(),
                room_id: current.to_string(),
            });
        }

        loop {
            let room = {
                let mut rooms = self.rooms.write().await;
                rooms
                    .entry(room_id.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(Room::default())))
                    .clone()
            };

            let mut room = room.lock().await;
            if room.closed {
                tracing::debug!(room_id = %room_id, "Room closed while joining, retrying");
                continue;
            }

            let count = room.members.len() + 1;
            session.handle().deliver(ServerMessage::Joined {
                room_id: room_id.to_string(),
                count,
            });

            let (notified, _) = room.broadcast(
                &ServerMessage::NewPeer {
                    room_id: room_id.to_string(),
                    peer: session.id(),
                },
                None,
            );

            room.members.insert(session.id(), session.handle().clone());
            session.set_room(room_id.to_string());

            return Ok(JoinOutcome { count, notified });
        }
    }

    /// Relays `payload` to every other member of `room_id`.
    ///
    /// The sender must currently occupy `room_id`. A room that no longer
    /// exists has no recipients.
    pub async fn signal(
        &self,
        session: &PeerSession,
        room_id: &str,
        payload: Payload,
    ) -> Result<SignalOutcome> {
        if room_id.is_empty() {
            return Err(RelayError::EmptyRoomId);
        }

        if session.room_id() != Some(room_id) {
            return Err(RelayError::NotInRoom {
                peer_id: session.id().to_string(),
                room_id: room_id.to_string(),
            });
        }

        let Some(room) = self.get_room(room_id).await else {
            return Ok(SignalOutcome::default());
        };

        let room = room.lock().await;
        if room.closed || !room.members.contains_key(&session.id()) {
            return Err(RelayError::NotInRoom {
                peer_id: session.id().to_string(),
                room_id: room_id.to_string(),
            });
        }

        let message = ServerMessage::Signal {
            room_id: room_id.to_string(),
            payload,
        };
        let (delivered, skipped) = room.broadcast(&message, Some(session.id()));

        Ok(SignalOutcome { delivered, skipped })
    }

    /// Removes `session` from its room and tells the remaining members.
    /// The room entry is dropped once it is empty. No-op for a peer that
    /// is not in a room.
    pub async fn leave(&self, session: &mut PeerSession) -> Option<LeaveOutcome> {
        let room_id = session.take_room()?;
        let peer_id = session.id();

        let Some(room_ref) = self.get_room(&room_id).await else {
            tracing::warn!(peer_id = %peer_id, room_id = %room_id, "Room missing on leave");
            return None;
        };

        let mut room = room_ref.lock().await;
        if room.members.remove(&peer_id).is_none() {
            tracing::warn!(peer_id = %peer_id, room_id = %room_id, "Peer missing from room on leave");
            return None;
        }

        let remaining = room.members.len();
        if remaining == 0 {
            room.closed = true;
            let mut rooms = self.rooms.write().await;
            if rooms
                .get(&room_id)
                .is_some_and(|current| Arc::ptr_eq(current, &room_ref))
            {
                rooms.remove(&room_id);
            }
            tracing::debug!(room_id = %room_id, "Removed empty room");
        } else {
            room.broadcast(
                &ServerMessage::PeerLeft {
                    room_id: room_id.clone(),
                    peer: peer_id,
                },
                None,
            );
        }

        Some(LeaveOutcome {
            room_id,
            remaining,
            room_closed: remaining == 0,
        })
    }

    async fn room_refs(&self) -> Vec<Arc<Mutex<Room>>> {
        let rooms = self.rooms.read().await;
        rooms.values().cloned().collect()
    }

    /// Number of rooms with at least one member.
    pub async fn room_count(&self) -> usize {
        let mut count = 0;
        for room in self.room_refs().await {
            if !room.lock().await.members.is_empty() {
                count += 1;
            }
        }
        count
    }

    /// Number of peers currently in a room.
    pub async fn peer_count(&self) -> usize {
        let mut count = 0;
        for room in self.room_refs().await {
            count += room.lock().await.members.len();
        }
        count
    }

    /// Members of `room_id`; 0 when the room does not exist.
    pub async fn room_size(&self, room_id: &str) -> usize {
        match self.get_room(room_id).await {
            Some(room) => room.lock().await.members.len(),
            None => 0,
        }
    }

    pub async fn room_exists(&self, room_id: &str) -> bool {
        self.room_size(room_id).await > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio::time::{sleep, Duration};

    type Inbox = mpsc::Receiver<ServerMessage>;

    fn drain(rx: &mut Inbox) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    fn peer() -> (PeerSession, Inbox) {
        PeerSession::new(64)
    }

    fn offer() -> Payload {
        let mut payload = Payload::new();
        payload.insert("sdp".to_string(), json!("offer..."));
        payload
    }

    #[tokio::test]
    async fn test_first_join_creates_room() {
        let registry = RoomRegistry::new();
        let (mut a, mut a_rx) = peer();

        let outcome = registry.join(&mut a, "x").await.unwrap();
        assert_eq!(outcome, JoinOutcome { count: 1, notified: 0 });
        assert_eq!(a.room_id(), Some("x"));
        assert!(registry.room_exists("x").await);
        assert_eq!(
            drain(&mut a_rx),
            vec![ServerMessage::Joined {
                room_id: "x".to_string(),
                count: 1
            }]
        );
    }

    #[tokio::test]
    async fn test_nth_join_counts_and_notifies() {
        let registry = RoomRegistry::new();
        let mut peers = Vec::new();

        for n in 1..=5 {
            let (mut session, mut rx) = peer();
            let outcome = registry.join(&mut session, "x").await.unwrap();
            assert_eq!(outcome.count, n);
            assert_eq!(outcome.notified, n - 1);
            assert_eq!(
                drain(&mut rx),
                vec![ServerMessage::Joined {
                    room_id: "x".to_string(),
                    count: n
                }]
            );

            for (_, existing_rx) in peers.iter_mut() {
                assert_eq!(
                    drain(existing_rx),
                    vec![ServerMessage::NewPeer {
                        room_id: "x".to_string(),
                        peer: session.id()
                    }]
                );
            }
            peers.push((session, rx));
        }

        assert_eq!(registry.room_size("x").await, 5);
    }

    #[tokio::test]
    async fn test_join_rejects_empty_room_id() {
        let registry = RoomRegistry::new();
        let (mut a, mut a_rx) = peer();

        let err = registry.join(&mut a, "").await.unwrap_err();
        assert!(matches!(err, RelayError::EmptyRoomId));
        assert!(a.room_id().is_none());
        assert!(drain(&mut a_rx).is_empty());
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_rejoin_is_rejected() {
        let registry = RoomRegistry::new();
        let (mut a, mut a_rx) = peer();
        registry.join(&mut a, "x").await.unwrap();
        drain(&mut a_rx);

        let err = registry.join(&mut a, "y").await.unwrap_err();
        assert!(matches!(err, RelayError::AlreadyJoined { .. }));
        let err = registry.join(&mut a, "x").await.unwrap_err();
        assert!(matches!(err, RelayError::AlreadyJoined { .. }));

        assert_eq!(a.room_id(), Some("x"));
        assert_eq!(registry.room_size("x").await, 1);
        assert!(!registry.room_exists("y").await);
        assert!(drain(&mut a_rx).is_empty());
    }

    #[tokio::test]
    async fn test_signal_reaches_others_only() {
        let registry = RoomRegistry::new();
        let (mut a, mut a_rx) = peer();
        let (mut b, mut b_rx) = peer();
        let (mut c, mut c_rx) = peer();
        registry.join(&mut a, "x").await.unwrap();
        registry.join(&mut b, "x").await.unwrap();
        registry.join(&mut c, "x").await.unwrap();
        drain(&mut a_rx);
        drain(&mut b_rx);
        drain(&mut c_rx);

        let outcome = registry.signal(&a, "x", offer()).await.unwrap();
        assert_eq!(outcome, SignalOutcome { delivered: 2, skipped: 0 });

        let expected = ServerMessage::Signal {
            room_id: "x".to_string(),
            payload: offer(),
        };
        assert!(drain(&mut a_rx).is_empty());
        assert_eq!(drain(&mut b_rx), vec![expected.clone()]);
        assert_eq!(drain(&mut c_rx), vec![expected]);
    }

    #[tokio::test]
    async fn test_signal_from_outside_room_is_ignored() {
        let registry = RoomRegistry::new();
        let (mut a, mut a_rx) = peer();
        let (mut b, mut b_rx) = peer();
        let (outsider, _outsider_rx) = peer();
        registry.join(&mut a, "x").await.unwrap();
        registry.join(&mut b, "y").await.unwrap();
        drain(&mut a_rx);
        drain(&mut b_rx);

        let err = registry.signal(&b, "x", offer()).await.unwrap_err();
        assert!(matches!(err, RelayError::NotInRoom { .. }));
        let err = registry.signal(&outsider, "x", offer()).await.unwrap_err();
        assert!(matches!(err, RelayError::NotInRoom { .. }));
        let err = registry.signal(&a, "", offer()).await.unwrap_err();
        assert!(matches!(err, RelayError::EmptyRoomId));

        assert!(drain(&mut a_rx).is_empty());
        assert!(drain(&mut b_rx).is_empty());
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let registry = RoomRegistry::new();
        let (mut a, mut a_rx) = peer();
        let (mut b, mut b_rx) = peer();
        let (mut c, mut c_rx) = peer();
        registry.join(&mut a, "x").await.unwrap();
        registry.join(&mut b, "x").await.unwrap();
        registry.join(&mut c, "y").await.unwrap();
        drain(&mut a_rx);
        drain(&mut b_rx);
        drain(&mut c_rx);

        registry.signal(&a, "x", offer()).await.unwrap();
        registry.leave(&mut b).await.unwrap();

        assert!(drain(&mut c_rx).is_empty());
        assert_eq!(registry.room_size("y").await, 1);
    }

    #[tokio::test]
    async fn test_leave_notifies_remaining_and_closes_empty_room() {
        let registry = RoomRegistry::new();
        let (mut a, mut a_rx) = peer();
        let (mut b, mut b_rx) = peer();
        registry.join(&mut a, "x").await.unwrap();
        registry.join(&mut b, "x").await.unwrap();
        drain(&mut a_rx);
        drain(&mut b_rx);

        let outcome = registry.leave(&mut b).await.unwrap();
        assert_eq!(
            outcome,
            LeaveOutcome {
                room_id: "x".to_string(),
                remaining: 1,
                room_closed: false
            }
        );
        assert!(b.room_id().is_none());
        assert_eq!(
            drain(&mut a_rx),
            vec![ServerMessage::PeerLeft {
                room_id: "x".to_string(),
                peer: b.id()
            }]
        );
        assert!(drain(&mut b_rx).is_empty());

        let outcome = registry.leave(&mut a).await.unwrap();
        assert!(outcome.room_closed);
        assert!(!registry.room_exists("x").await);
        assert_eq!(registry.room_count().await, 0);
        assert_eq!(registry.peer_count().await, 0);
    }

    #[tokio::test]
    async fn test_leave_without_room_is_noop() {
        let registry = RoomRegistry::new();
        let (mut a, mut a_rx) = peer();
        let (mut b, mut b_rx) = peer();
        registry.join(&mut b, "x").await.unwrap();
        drain(&mut b_rx);

        assert!(registry.leave(&mut a).await.is_none());
        assert!(drain(&mut a_rx).is_empty());
        assert!(drain(&mut b_rx).is_empty());
        assert_eq!(registry.room_size("x").await, 1);

        registry.leave(&mut b).await.unwrap();
        assert!(registry.leave(&mut b).await.is_none());
    }

    #[tokio::test]
    async fn test_room_is_fresh_after_last_member_leaves() {
        let registry = RoomRegistry::new();
        let (mut a, _a_rx) = peer();
        registry.join(&mut a, "x").await.unwrap();
        registry.leave(&mut a).await.unwrap();

        let (mut b, mut b_rx) = peer();
        let outcome = registry.join(&mut b, "x").await.unwrap();
        assert_eq!(outcome, JoinOutcome { count: 1, notified: 0 });
        assert_eq!(
            drain(&mut b_rx),
            vec![ServerMessage::Joined {
                room_id: "x".to_string(),
                count: 1
            }]
        );
    }

    #[tokio::test]
    async fn test_join_retries_when_last_leave_closes_room() {
        let registry = RoomRegistry::new();
        let (mut last, _last_rx) = peer();
        registry.join(&mut last, "x").await.unwrap();

        let old_room = registry.get_room("x").await.unwrap();
        let held = old_room.lock().await;

        // Queue the last leave on the room lock first, then a join that has
        // already picked up the same room entry.
        let leaver = tokio::spawn({
            let registry = registry.clone();
            async move { registry.leave(&mut last).await }
        });
        sleep(Duration::from_millis(20)).await;

        let joiner = tokio::spawn({
            let registry = registry.clone();
            async move {
                let (mut session, mut rx) = peer();
                let outcome = registry.join(&mut session, "x").await.unwrap();
                (outcome, drain(&mut rx), session)
            }
        });
        sleep(Duration::from_millis(20)).await;

        drop(held);

        let left = leaver.await.unwrap().unwrap();
        assert!(left.room_closed);

        let (outcome, messages, session) = joiner.await.unwrap();
        assert_eq!(outcome, JoinOutcome { count: 1, notified: 0 });
        assert_eq!(
            messages,
            vec![ServerMessage::Joined {
                room_id: "x".to_string(),
                count: 1
            }]
        );
        assert_eq!(session.room_id(), Some("x"));

        assert!(old_room.lock().await.closed);
        let fresh_room = registry.get_room("x").await.unwrap();
        assert!(!Arc::ptr_eq(&fresh_room, &old_room));
        assert_eq!(registry.room_size("x").await, 1);
    }

    #[tokio::test]
    async fn test_full_queue_does_not_block_broadcast() {
        let registry = RoomRegistry::new();
        let (mut a, _a_rx) = peer();
        let (mut slow, _slow_rx) = PeerSession::new(1);
        let (mut b, mut b_rx) = peer();
        registry.join(&mut a, "x").await.unwrap();
        registry.join(&mut slow, "x").await.unwrap();
        registry.join(&mut b, "x").await.unwrap();
        drain(&mut b_rx);

        // `slow` still holds its own `joined`, so every further send is skipped.
        let outcome = registry.signal(&a, "x", offer()).await.unwrap();
        assert_eq!(outcome, SignalOutcome { delivered: 1, skipped: 1 });
        assert_eq!(drain(&mut b_rx).len(), 1);
    }

    #[tokio::test]
    async fn test_closed_receiver_is_skipped() {
        let registry = RoomRegistry::new();
        let (mut a, _a_rx) = peer();
        let (mut gone, gone_rx) = peer();
        registry.join(&mut a, "x").await.unwrap();
        registry.join(&mut gone, "x").await.unwrap();
        drop(gone_rx);

        let outcome = registry.signal(&a, "x", offer()).await.unwrap();
        assert_eq!(outcome, SignalOutcome { delivered: 0, skipped: 1 });
    }

    #[tokio::test]
    async fn test_concurrent_joins_see_consistent_counts() {
        let registry = RoomRegistry::new();
        let peers = 32;

        let tasks: Vec<_> = (0..peers)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    let (mut session, rx) = PeerSession::new(peers + 1);
                    let outcome = registry.join(&mut session, "x").await.unwrap();
                    (outcome.count, session, rx)
                })
            })
            .collect();

        let mut joined = Vec::new();
        for task in tasks {
            joined.push(task.await.unwrap());
        }

        let mut counts: Vec<usize> = joined.iter().map(|(count, _, _)| *count).collect();
        counts.sort_unstable();
        assert_eq!(counts, (1..=peers).collect::<Vec<_>>());

        // Each peer hears about exactly the peers that joined after it.
        for (count, _session, rx) in joined.iter_mut() {
            let messages = drain(rx);
            let new_peers = messages
                .iter()
                .filter(|m| matches!(m, ServerMessage::NewPeer { .. }))
                .count();
            assert_eq!(new_peers, peers - *count);
        }
        assert_eq!(registry.room_size("x").await, peers);
    }

    #[tokio::test]
    async fn test_concurrent_join_and_leave_keep_membership_consistent() {
        let registry = RoomRegistry::new();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    for _ in 0..50 {
                        let (mut session, _rx) = PeerSession::new(256);
                        registry.join(&mut session, "churn").await.unwrap();
                        registry.leave(&mut session).await.unwrap();
                    }
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        assert!(!registry.room_exists("churn").await);
        assert_eq!(registry.peer_count().await, 0);
    }

    #[tokio::test]
    async fn test_counts_across_rooms() {
        let registry = RoomRegistry::new();
        let (mut a, _a_rx) = peer();
        let (mut b, _b_rx) = peer();
        let (mut c, _c_rx) = peer();
        registry.join(&mut a, "x").await.unwrap();
        registry.join(&mut b, "x").await.unwrap();
        registry.join(&mut c, "y").await.unwrap();

        assert_eq!(registry.room_count().await, 2);
        assert_eq!(registry.peer_count().await, 3);
        assert_eq!(registry.room_size("x").await, 2);
        assert_eq!(registry.room_size("nowhere").await, 0);
    }
}
