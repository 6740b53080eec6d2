//! Authoritative registry of connected participants.
//!
//! Plain data with no locking; the relay wraps one registry per instance in
//! a lock and serializes every mutation through it. Identities are drawn
//! from a sequence counter that only moves forward, so an id is never
//! handed out twice by the same registry.

use std::collections::HashMap;

use crate::broadcast::Outbox;
use crate::identity::allocate_identity;
use crate::protocol::{DisplayIdentity, ParticipantId, ParticipantSnapshot, Transform};

/// A connected client's authoritative record.
#[derive(Debug)]
pub struct Participant {
    pub id: ParticipantId,
    pub identity: DisplayIdentity,
    pub state: Transform,
    /// Admission order.
    seq: u64,
    connection: Outbox,
}

impl Participant {
    pub fn snapshot(&self) -> ParticipantSnapshot {
        ParticipantSnapshot {
            id: self.id.clone(),
            name: self.identity.name.clone(),
            color: self.identity.color,
            state: self.state,
        }
    }
}

/// Result of admitting a connection.
#[derive(Debug, Clone)]
pub struct Admission {
    pub id: ParticipantId,
    pub identity: DisplayIdentity,
    /// Everyone registered before this admission, in admission order.
    pub existing: Vec<ParticipantSnapshot>,
}

#[derive(Debug)]
pub struct ParticipantRegistry {
    participants: HashMap<ParticipantId, Participant>,
    next_seq: u64,
    spawn: Transform,
}

impl Default for ParticipantRegistry {
    fn default() -> Self {
        Self::new(Transform::SPAWN)
    }
}

impl ParticipantRegistry {
    /// Create an empty registry whose participants start at `spawn`.
    pub fn new(spawn: Transform) -> Self {
        Self {
            participants: HashMap::new(),
            next_seq: 1,
            spawn,
        }
    }

    /// Register a new connection.
    ///
    /// The returned snapshot is taken before the new participant is
    /// inserted, so it never contains the participant itself.
    pub fn admit(&mut self, connection: Outbox) -> Admission {
        let existing = self.snapshot(None);
        let identity = allocate_identity(self.participants.values().map(|p| &p.identity));

        let seq = self.next_seq;
        self.next_seq += 1;
        let id = ParticipantId::from_sequence(seq);

        self.participants.insert(
            id.clone(),
            Participant {
                id: id.clone(),
                identity: identity.clone(),
                state: self.spawn,
                seq,
                connection,
            },
        );

        Admission {
            id,
            identity,
            existing,
        }
    }

    /// Overwrite a participant's transform. Returns `false` for unknown ids.
    pub fn update_state(&mut self, id: &ParticipantId, state: Transform) -> bool {
        match self.participants.get_mut(id) {
            Some(participant) => {
                participant.state = state;
                true
            }
            None => false,
        }
    }

    /// Remove a participant. Only the first call for an id returns it.
    pub fn remove(&mut self, id: &ParticipantId) -> Option<Participant> {
        self.participants.remove(id)
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.get(id)
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participants.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// All participants except `exclude`, in admission order.
    pub fn snapshot(&self, exclude: Option<&ParticipantId>) -> Vec<ParticipantSnapshot> {
        let mut participants: Vec<&Participant> = self
            .participants
            .values()
            .filter(|p| Some(&p.id) != exclude)
            .collect();
        participants.sort_by_key(|p| p.seq);
        participants.iter().map(|p| p.snapshot()).collect()
    }

    /// Copy of the current recipient list for a broadcast.
    pub fn recipients(&self) -> Vec<(ParticipantId, Outbox)> {
        self.participants
            .values()
            .map(|p| (p.id.clone(), p.connection.clone()))
            .collect()
    }
}
