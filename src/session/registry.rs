//! Session registry
//!
//! Sessions live in a slab of slots. A [`SessionId`] names a slot together
//! with the slot's generation, so a handle kept past its session's removal
//! resolves to nothing instead of to whichever session reused the slot.
//! A side index maps each [`FlowKey`] to its handle, which keeps identity
//! tuples unique and makes lookups and removals O(1).

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use super::types::{FlowKey, Protocol, Session};
use crate::error::RegistryError;

/// Stable handle to a registered session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId {
    index: u32,
    generation: u32,
}

impl SessionId {
    /// Encode as a 64-bit readiness token
    ///
    /// Generations never reach `u32::MAX`, so tokens never collide with the
    /// reserved values at the top of the range.
    #[must_use]
    pub const fn token(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Decode a readiness token
    #[must_use]
    pub const fn from_token(token: u64) -> Self {
        Self {
            index: token as u32,
            generation: (token >> 32) as u32,
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

const fn next_generation(generation: u32) -> u32 {
    if generation >= u32::MAX - 1 {
        0
    } else {
        generation + 1
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    session: Option<Session>,
}

/// Live session counts per protocol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounts {
    pub icmp: usize,
    pub udp: usize,
    pub tcp: usize,
}

impl SessionCounts {
    /// Sum over all protocols
    #[must_use]
    pub const fn total(&self) -> usize {
        self.icmp + self.udp + self.tcp
    }
}

/// Owned collection of the sessions of one tunnel run
#[derive(Debug, Default)]
pub struct SessionRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    index: HashMap<FlowKey, SessionId>,
}

impl SessionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] when a session with the same
    /// identity tuple is already registered.
    pub fn insert(&mut self, session: Session) -> Result<SessionId, RegistryError> {
        let key = *session.key();
        if self.index.contains_key(&key) {
            return Err(RegistryError::Duplicate(key));
        }

        let id = if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.session = Some(session);
            SessionId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = u32::try_from(self.slots.len()).map_err(|_| RegistryError::Exhausted)?;
            self.slots.push(Slot {
                generation: 0,
                session: Some(session),
            });
            SessionId {
                index,
                generation: 0,
            }
        };

        self.index.insert(key, id);
        Ok(id)
    }

    /// Session for a handle
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.session.as_ref())
    }

    /// Mutable session for a handle
    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.session.as_mut())
    }

    /// Handle of the session with this identity tuple
    #[must_use]
    pub fn lookup(&self, key: &FlowKey) -> Option<SessionId> {
        self.index.get(key).copied()
    }

    /// Whether the handle refers to a registered session
    #[must_use]
    pub fn contains(&self, id: SessionId) -> bool {
        self.get(id).is_some()
    }

    /// Remove a session, returning it
    ///
    /// Only the eviction engine removes sessions, so that every removal
    /// deregisters the socket and runs the handler's `release`.
    pub(crate) fn remove(&mut self, id: SessionId) -> Option<Session> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let session = slot.session.take()?;
        slot.generation = next_generation(slot.generation);
        self.free.push(id.index);
        self.index.remove(session.key());
        Some(session)
    }

    /// Snapshot of all handles, safe to hold while removing
    #[must_use]
    pub fn ids(&self) -> Vec<SessionId> {
        self.iter().map(|(id, _)| id).collect()
    }

    /// Iterate over registered sessions
    pub fn iter(&self) -> impl Iterator<Item = (SessionId, &Session)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.session.as_ref().map(|session| {
                (
                    SessionId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    session,
                )
            })
        })
    }

    /// Iterate mutably over registered sessions
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SessionId, &mut Session)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.session.as_mut().map(|session| {
                (
                    SessionId {
                        index: index as u32,
                        generation,
                    },
                    session,
                )
            })
        })
    }

    /// Number of registered sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether no session is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Count live sessions per protocol
    #[must_use]
    pub fn live_counts(&self) -> SessionCounts {
        let mut counts = SessionCounts::default();
        for (_, session) in self.iter().filter(|(_, s)| s.is_live()) {
            match session.protocol() {
                Protocol::Icmp => counts.icmp += 1,
                Protocol::Udp => counts.udp += 1,
                Protocol::Tcp => counts.tcp += 1,
            }
        }
        counts
    }
}
