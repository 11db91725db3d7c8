//! Thread-safe registry of live sessions.
//!
//! Maps [`SessionId`] to a shared [`SessionHandle`]. Backed by a sharded
//! `DashMap`, so lookups from many producer tasks only contend on one shard
//! and registration/removal (connect/disconnect) never take a global lock.
//!
//! Map guards are never held across an `.await` or while tearing a session
//! down: handles are cloned out, the guard dropped, and only then acted on.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::EmitterConfig;
use crate::error::{ConfigError, EmitError, EmitResult};
use crate::runtime::TaskSpawner;
use crate::transport::Transport;
use crate::utils::now_millis;

use super::client::{ClientInfo, Purpose, SessionId};
use super::events::{RemovalReason, SessionEvent};
use super::handle::SessionHandle;

/// Per-group session counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GroupDistribution {
    #[serde(rename = "pub")]
    pub publishers: usize,
    #[serde(rename = "sub")]
    pub subscribers: usize,
}

/// Registry of sessions keyed by id.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
    config: EmitterConfig,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionRegistry {
    /// Creates an empty registry. `config` is used for sessions opened via
    /// [`open`](Self::open).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails [`EmitterConfig::validate`].
    pub fn new(config: EmitterConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.event_channel_capacity);
        Ok(Self {
            sessions: DashMap::new(),
            config,
            events,
        })
    }

    pub fn config(&self) -> &EmitterConfig {
        &self.config
    }

    /// Returns a receiver for session lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Creates a session over `transport` and registers it.
    ///
    /// On [`EmitError::DuplicateSession`] the new session is closed, so
    /// `transport` is still released.
    pub fn open<T, S>(
        &self,
        id: SessionId,
        client: ClientInfo,
        transport: T,
        spawner: &S,
    ) -> EmitResult<Arc<SessionHandle>>
    where
        T: Transport,
        S: TaskSpawner + ?Sized,
    {
        let handle = Arc::new(SessionHandle::spawn(
            id,
            client,
            transport,
            &self.config,
            spawner,
        ));
        if let Err(e) = self.register(Arc::clone(&handle)) {
            handle.close();
            return Err(e);
        }
        Ok(handle)
    }

    /// Registers a handle under its id.
    ///
    /// Fails with [`EmitError::DuplicateSession`] if a live session already
    /// uses the id. A dead leftover entry is replaced.
    pub fn register(&self, handle: Arc<SessionHandle>) -> EmitResult<()> {
        let id = handle.id().clone();
        let client = handle.client().clone();

        let replaced = match self.sessions.entry(id.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live() {
                    log::warn!("[Registry] Duplicate session rejected: {}", id);
                    return Err(EmitError::DuplicateSession(id.to_string()));
                }
                Some(occupied.insert(handle))
            }
            Entry::Vacant(vacant) => {
                vacant.insert(handle);
                None
            }
        };

        if let Some(stale) = replaced {
            stale.close();
            self.publish_removed(&stale, RemovalReason::Replaced);
        }

        log::info!(
            "[Registry] Session registered: {} {} (total: {})",
            id,
            client,
            self.sessions.len()
        );
        self.publish(SessionEvent::Registered {
            session_id: id,
            client,
            timestamp: now_millis(),
        });
        Ok(())
    }

    /// Returns the live session registered under `id`.
    ///
    /// Sessions that already observed a fatal error are reported as absent
    /// even before their entry is removed.
    pub fn lookup(&self, id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|handle| handle.is_live())
    }

    /// Removes and closes the session registered under `id`.
    ///
    /// Idempotent: returns true only for the call that actually removed the
    /// entry; later or concurrent calls are no-ops.
    pub fn remove(&self, id: &str, reason: RemovalReason) -> bool {
        match self.sessions.remove(id) {
            Some((_, handle)) => {
                self.teardown(&handle, reason);
                true
            }
            None => false,
        }
    }

    /// Removes `id` only if it still maps to `handle`.
    ///
    /// Used by failure paths holding a handle, so a newer registration under
    /// the same id is left alone.
    pub fn remove_if_same(
        &self,
        id: &str,
        handle: &Arc<SessionHandle>,
        reason: RemovalReason,
    ) -> bool {
        match self
            .sessions
            .remove_if(id, |_, current| Arc::ptr_eq(current, handle))
        {
            Some((_, removed)) => {
                self.teardown(&removed, reason);
                true
            }
            None => false,
        }
    }

    fn teardown(&self, handle: &Arc<SessionHandle>, reason: RemovalReason) {
        handle.close();
        log::info!(
            "[Registry] Session removed: {} ({:?}, age: {:?}, remaining: {})",
            handle.id(),
            reason,
            handle.age(),
            self.sessions.len()
        );
        self.publish_removed(handle, reason);
    }

    /// Records client activity on `id`. Returns false if the session is unknown.
    pub fn touch(&self, id: &str) -> bool {
        match self.sessions.get(id) {
            Some(entry) => {
                entry.value().touch();
                true
            }
            None => false,
        }
    }

    /// Removes sessions idle for longer than `max_idle`, plus entries whose
    /// stream already failed. Returns the removed ids.
    pub fn sweep_idle(&self, max_idle: Duration) -> Vec<SessionId> {
        let candidates: Vec<(Arc<SessionHandle>, RemovalReason)> = self
            .sessions
            .iter()
            .filter_map(|entry| {
                let handle = entry.value();
                if !handle.is_live() {
                    Some((Arc::clone(handle), RemovalReason::SendFailed))
                } else if handle.idle_for() > max_idle {
                    Some((Arc::clone(handle), RemovalReason::IdleTimeout))
                } else {
                    None
                }
            })
            .collect();

        candidates
            .into_iter()
            .filter(|(handle, reason)| self.remove_if_same(handle.id().as_str(), handle, *reason))
            .map(|(handle, _)| handle.id().clone())
            .collect()
    }

    /// Removes every session belonging to `subsystem`. Returns the removed ids.
    pub fn reject_by_subsystem(&self, subsystem: &str) -> Vec<SessionId> {
        let targets = self.collect(|handle| handle.client().subsystem == subsystem);
        let removed: Vec<SessionId> = targets
            .into_iter()
            .filter(|handle| {
                self.remove_if_same(handle.id().as_str(), handle, RemovalReason::Rejected)
            })
            .map(|handle| handle.id().clone())
            .collect();

        log::info!(
            "[Registry] Rejected {} session(s) of subsystem {}",
            removed.len(),
            subsystem
        );
        removed
    }

    /// Closes and removes every session. Returns how many were removed.
    pub fn close_all(&self) -> usize {
        let ids = self.ids();
        let count = ids
            .iter()
            .filter(|id| self.remove(id.as_str(), RemovalReason::Shutdown))
            .count();
        if count > 0 {
            log::info!("[Registry] Closed {} session(s)", count);
        } else {
            log::info!("[Registry] close_all called but no sessions to close");
        }
        count
    }

    /// Live sessions of a group.
    pub fn sessions_in_group(&self, group: &str) -> Vec<Arc<SessionHandle>> {
        self.collect(|handle| handle.is_live() && handle.client().group == group)
    }

    /// Publisher/subscriber counts per group.
    #[must_use]
    pub fn distribution(&self) -> BTreeMap<String, GroupDistribution> {
        let mut result: BTreeMap<String, GroupDistribution> = BTreeMap::new();
        for entry in self.sessions.iter() {
            let client = entry.value().client();
            let counts = result.entry(client.group.clone()).or_default();
            match client.purpose {
                Purpose::Pub => counts.publishers += 1,
                Purpose::Sub => counts.subscribers += 1,
            }
        }
        result
    }

    /// Returns the number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Returns all registered session ids.
    #[must_use]
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|r| r.key().clone()).collect()
    }

    fn collect(&self, keep: impl Fn(&SessionHandle) -> bool) -> Vec<Arc<SessionHandle>> {
        self.sessions
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    fn publish_removed(&self, handle: &SessionHandle, reason: RemovalReason) {
        self.publish(SessionEvent::Removed {
            session_id: handle.id().clone(),
            reason,
            sent: handle.sequence(),
            timestamp: now_millis(),
        });
    }

    fn publish(&self, event: SessionEvent) {
        if let Err(e) = self.events.send(event) {
            log::trace!("[Registry] No event subscribers: {}", e);
        }
    }
}
