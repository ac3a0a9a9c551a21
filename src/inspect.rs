use std::sync::Arc;

use anyhow::{Context, Result};

use crate::auth::{SessionConfig, SessionManager, SessionStore, UserRecord, UserStore};
use crate::config::StoreArgs;
use crate::metastore::{open_store, Store};

/// Record counts of the credential store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyCounts {
    pub users: usize,
    pub sessions: usize,
}

pub fn open(args: &StoreArgs) -> Result<Arc<dyn Store>> {
    open_store(args.metadata_db, &args.meta_root, args.durability).with_context(|| {
        format!(
            "failed to open {} store at {}",
            args.metadata_db,
            args.meta_root.display()
        )
    })
}

pub fn list_users(store: Arc<dyn Store>) -> Result<Vec<UserRecord>> {
    Ok(UserStore::new(store).list_users()?)
}

pub fn num_keys(store: Arc<dyn Store>) -> Result<KeyCounts> {
    let users = UserStore::new(store.clone()).count_users()?;
    let sessions = SessionStore::new(store).total_session_count()?;
    Ok(KeyCounts { users, sessions })
}

/// Live session count of the user with this email, `None` if there is no such user
pub fn user_sessions(store: Arc<dyn Store>, email: &str) -> Result<Option<usize>> {
    let Some(user) = UserStore::new(store.clone()).get_user_by_email(email)? else {
        return Ok(None);
    };
    let manager = SessionManager::new(store, SessionConfig::default());
    Ok(Some(manager.count_user_sessions(&user.user_id)?))
}

/// Deletes expired sessions, returning how many were removed
pub fn prune_sessions(store: Arc<dyn Store>) -> Result<usize> {
    let manager = SessionManager::new(store, SessionConfig::default());
    Ok(manager.delete_expired_sessions()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Session;
    use crate::metastore::MemoryStore;
    use chrono::{Duration, Utc};

    fn seeded() -> (Arc<dyn Store>, UserRecord) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let user = UserRecord::new(
            "alice".into(),
            "alice@example.com".into(),
            None,
            "$2b$04$notarealhash".into(),
        );
        UserStore::new(store.clone()).create_user(&user).unwrap();

        let sessions = SessionStore::new(store.clone());
        for expires_at in [Utc::now() - Duration::minutes(5), Utc::now() + Duration::hours(1)] {
            sessions
                .insert(&Session {
                    id: SessionStore::generate_session_id(),
                    user_id: user.user_id.clone(),
                    expires_at,
                    fresh: false,
                })
                .unwrap();
        }
        (store, user)
    }

    #[test]
    fn test_counts_and_prune() {
        let (store, user) = seeded();

        assert_eq!(list_users(store.clone()).unwrap(), vec![user]);
        assert_eq!(
            num_keys(store.clone()).unwrap(),
            KeyCounts { users: 1, sessions: 2 }
        );
        assert_eq!(user_sessions(store.clone(), "ALICE@example.com").unwrap(), Some(1));
        assert_eq!(user_sessions(store.clone(), "bob@example.com").unwrap(), None);

        assert_eq!(prune_sessions(store.clone()).unwrap(), 1);
        assert_eq!(prune_sessions(store.clone()).unwrap(), 0);
        assert_eq!(num_keys(store).unwrap().sessions, 1);
    }
}
