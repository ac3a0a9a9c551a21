use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::RngCore;
use tracing::{debug, warn};

use crate::metastore::{Store, StoreError};

const SESSIONS_TREE: &str = "_SESSIONS";
const SESSIONS_BY_USER_TREE: &str = "_SESSIONS_BY_USER";

/// Session ID length in bytes (32 bytes = 64 hex chars)
const SESSION_ID_BYTES: usize = 32;

/// A session as seen by the rest of the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Opaque token, also the cookie value
    pub id: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
    /// Set when the session was just issued or renewed and the client cookie must be updated
    pub fresh: bool,
}

impl Session {
    /// Checks if the session is expired at the given instant
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Session data as persisted, keyed by session id
#[derive(Debug, Clone, bincode::Encode, bincode::Decode)]
struct SessionRecord {
    user_id: String,
    /// Milliseconds since UNIX epoch
    expires_at: i64,
}

impl SessionRecord {
    fn to_vec(&self) -> Result<Vec<u8>, StoreError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Corrupt(format!("Failed to serialize SessionRecord: {}", e)))
    }

    fn from_slice(data: &[u8]) -> Result<Self, StoreError> {
        let (record, _len) = bincode::decode_from_slice(data, bincode::config::standard())
            .map_err(|e| {
                StoreError::Corrupt(format!("Failed to deserialize SessionRecord: {}", e))
            })?;
        Ok(record)
    }

    fn into_session(self, id: String) -> Result<Session, StoreError> {
        let expires_at = DateTime::<Utc>::from_timestamp_millis(self.expires_at).ok_or_else(|| {
            StoreError::Corrupt(format!("Session {} has an out of range expiry", id))
        })?;
        Ok(Session {
            id,
            user_id: self.user_id,
            expires_at,
            fresh: false,
        })
    }
}

fn user_index_prefix(user_id: &str) -> String {
    format!("{}/", user_id)
}

fn user_index_key(user_id: &str, session_id: &str) -> String {
    format!("{}/{}", user_id, session_id)
}

/// Persistent session store.
///
/// Sessions live in one tree keyed by id, with a secondary `user_id/session_id`
/// index so all sessions of a user can be found without a full scan.
#[derive(Debug, Clone)]
pub struct SessionStore {
    store: Arc<dyn Store>,
}

impl SessionStore {
    /// Creates a new session store
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Generates a cryptographically random session ID
    pub fn generate_session_id() -> String {
        let mut bytes = [0u8; SESSION_ID_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Persists a new session
    pub fn insert(&self, session: &Session) -> Result<(), StoreError> {
        debug!("Storing session {} for user: {}", session.id, session.user_id);

        let record = SessionRecord {
            user_id: session.user_id.clone(),
            expires_at: session.expires_at.timestamp_millis(),
        };

        // Record first: an index entry then always points at a record that exists or
        // was deleted, never at one still being written
        let sessions_tree = self.store.tree_open(SESSIONS_TREE)?;
        sessions_tree.insert(session.id.as_bytes(), record.to_vec()?)?;

        let index_tree = self.store.tree_open(SESSIONS_BY_USER_TREE)?;
        index_tree.insert(
            user_index_key(&session.user_id, &session.id).as_bytes(),
            Vec::new(),
        )
    }

    /// Gets a session by id, expired or not
    pub fn get(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let sessions_tree = self.store.tree_open(SESSIONS_TREE)?;
        match sessions_tree.get(session_id.as_bytes())? {
            Some(data) => Ok(Some(
                SessionRecord::from_slice(&data)?.into_session(session_id.to_string())?,
            )),
            None => Ok(None),
        }
    }

    /// Moves the expiry of an existing session.
    ///
    /// Returns `false` if the session was deleted in the meantime; it is not recreated.
    pub fn update_expiry(
        &self,
        session_id: &str,
        user_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let record = SessionRecord {
            user_id: user_id.to_string(),
            expires_at: expires_at.timestamp_millis(),
        };
        let sessions_tree = self.store.tree_open(SESSIONS_TREE)?;
        sessions_tree.insert_if_present(session_id.as_bytes(), record.to_vec()?)
    }

    /// Deletes a session and returns it if this call removed it
    pub fn delete(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        debug!("Deleting session: {}", session_id);

        let sessions_tree = self.store.tree_open(SESSIONS_TREE)?;
        let session = match sessions_tree.take(session_id.as_bytes())? {
            Some(data) => SessionRecord::from_slice(&data)?.into_session(session_id.to_string())?,
            None => return Ok(None),
        };

        let index_tree = self.store.tree_open(SESSIONS_BY_USER_TREE)?;
        index_tree.remove(user_index_key(&session.user_id, session_id).as_bytes())?;

        Ok(Some(session))
    }

    /// Returns all stored sessions of a user, expired ones included
    pub fn user_sessions(&self, user_id: &str) -> Result<Vec<Session>, StoreError> {
        let mut sessions = Vec::new();
        for session_id in self.indexed_session_ids(user_id)? {
            if let Some(session) = self.get(&session_id)? {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }

    /// Deletes every session of a user and returns the ones this call removed
    pub fn delete_user_sessions(&self, user_id: &str) -> Result<Vec<Session>, StoreError> {
        debug!("Deleting all sessions for user: {}", user_id);

        let mut removed = Vec::new();
        for session_id in self.indexed_session_ids(user_id)? {
            if let Some(session) = self.delete(&session_id)? {
                removed.push(session);
            }
        }

        if !removed.is_empty() {
            debug!("Removed {} sessions for user: {}", removed.len(), user_id);
        }
        Ok(removed)
    }

    /// Deletes all sessions expired at `now`, returning how many were removed.
    ///
    /// Also drops index entries left behind by a delete that stopped between the
    /// record and the index.
    pub fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let sessions_tree = self.store.tree_open(SESSIONS_TREE)?;

        let mut removed = 0;
        for (key, value) in sessions_tree.scan_prefix(b"")? {
            let session_id = match String::from_utf8(key) {
                Ok(id) => id,
                Err(e) => {
                    warn!(error = %e, "Skipping session with non UTF-8 id");
                    continue;
                }
            };
            let session = match SessionRecord::from_slice(&value)
                .and_then(|record| record.into_session(session_id.clone()))
            {
                Ok(session) => session,
                Err(e) => {
                    warn!(error = %e, session_id = %session_id, "Skipping undecodable session");
                    continue;
                }
            };
            if session.is_expired_at(now) && self.delete(&session.id)?.is_some() {
                debug!("Removing expired session: {}", session.id);
                removed += 1;
            }
        }

        let index_tree = self.store.tree_open(SESSIONS_BY_USER_TREE)?;
        for (key, _) in index_tree.scan_prefix(b"")? {
            let Some(session_id) = key.rsplit(|b| *b == b'/').next() else {
                continue;
            };
            if !sessions_tree.contains_key(session_id)? {
                index_tree.remove(&key)?;
            }
        }

        if removed > 0 {
            debug!("Cleaned up {} expired sessions", removed);
        }
        Ok(removed)
    }

    /// Returns the total number of sessions (including expired)
    pub fn total_session_count(&self) -> Result<usize, StoreError> {
        self.store.num_keys(SESSIONS_TREE)
    }

    /// Reads the user index. Read only; stale entries are left to `delete_expired`.
    fn indexed_session_ids(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let index_tree = self.store.tree_open(SESSIONS_BY_USER_TREE)?;
        let prefix = user_index_prefix(user_id);

        index_tree
            .scan_prefix(prefix.as_bytes())?
            .into_iter()
            .map(|(key, _)| {
                String::from_utf8(key[prefix.len()..].to_vec()).map_err(|e| {
                    StoreError::Corrupt(format!("Invalid UTF-8 in session index: {}", e))
                })
            })
            .collect()
    }
}
