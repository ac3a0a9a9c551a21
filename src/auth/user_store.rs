use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::metastore::{Store, StoreError};

const USERS_TREE: &str = "_USERS";
const USERS_BY_EMAIL_TREE: &str = "_USERS_BY_EMAIL";

/// User record stored in the database
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct UserRecord {
    /// Primary key, a random UUID
    pub user_id: String,
    pub username: String,
    /// Email as submitted at signup; lookups use the normalized form
    pub email: String,
    /// Optional display name
    pub name: Option<String>,
    /// Bcrypt password hash
    pub password_hash: String,
    /// Account creation timestamp (seconds since UNIX epoch)
    pub created_at: i64,
}

impl UserRecord {
    /// Creates a new user record with a fresh id. The password must already be hashed.
    pub fn new(
        username: String,
        email: String,
        name: Option<String>,
        password_hash: String,
    ) -> Self {
        Self {
            user_id: Uuid::new_v4().to_string(),
            username,
            email,
            name,
            password_hash,
            created_at: Utc::now().timestamp(),
        }
    }

    /// Serializes the user record to bytes
    pub fn to_vec(&self) -> Result<Vec<u8>, StoreError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Corrupt(format!("Failed to serialize UserRecord: {}", e)))
    }

    /// Deserializes a user record from bytes
    pub fn from_slice(data: &[u8]) -> Result<Self, StoreError> {
        let (user, _len) = bincode::decode_from_slice(data, bincode::config::standard())
            .map_err(|e| StoreError::Corrupt(format!("Failed to deserialize UserRecord: {}", e)))?;
        Ok(user)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CreateUserError {
    #[error("a user with email '{0}' already exists")]
    EmailTaken(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Canonical form of an email address used as the uniqueness key
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// User store managing user records and the email index
#[derive(Debug, Clone)]
pub struct UserStore {
    store: Arc<dyn Store>,
}

impl UserStore {
    /// Creates a new user store
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Creates a new user.
    ///
    /// The email index entry is claimed atomically, so of two concurrent signups
    /// with the same email exactly one succeeds.
    pub fn create_user(&self, user: &UserRecord) -> Result<(), CreateUserError> {
        debug!("Creating user: {}", user.user_id);

        let email_key = normalize_email(&user.email);
        let email_tree = self.store.tree_open(USERS_BY_EMAIL_TREE)?;
        if !email_tree.insert_if_absent(email_key.as_bytes(), user.user_id.as_bytes().to_vec())? {
            return Err(CreateUserError::EmailTaken(user.email.clone()));
        }

        let stored = user.to_vec().and_then(|data| {
            self.store
                .tree_open(USERS_TREE)?
                .insert(user.user_id.as_bytes(), data)
        });
        if let Err(e) = stored {
            // Release the email so a retry is possible
            if let Err(cleanup) = email_tree.remove(email_key.as_bytes()) {
                warn!(error = %cleanup, email = %email_key, "Failed to release email index entry");
            }
            return Err(e.into());
        }

        debug!("User created successfully: {}", user.user_id);
        Ok(())
    }

    /// Gets a user by user_id
    pub fn get_user_by_id(&self, user_id: &str) -> Result<Option<UserRecord>, StoreError> {
        let users_tree = self.store.tree_open(USERS_TREE)?;
        match users_tree.get(user_id.as_bytes())? {
            Some(data) => Ok(Some(UserRecord::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    /// Gets a user by email (case-insensitive)
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let email_tree = self.store.tree_open(USERS_BY_EMAIL_TREE)?;
        match email_tree.get(normalize_email(email).as_bytes())? {
            Some(user_id_bytes) => {
                let user_id = String::from_utf8(user_id_bytes)
                    .map_err(|e| StoreError::Corrupt(format!("Invalid UTF-8 in user_id: {}", e)))?;
                self.get_user_by_id(&user_id)
            }
            None => Ok(None),
        }
    }

    /// Checks whether an email is already registered
    pub fn email_exists(&self, email: &str) -> Result<bool, StoreError> {
        let email_tree = self.store.tree_open(USERS_BY_EMAIL_TREE)?;
        email_tree.contains_key(normalize_email(email).as_bytes())
    }

    /// Lists all users
    pub fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        let users_tree = self.store.tree_open(USERS_TREE)?;
        users_tree
            .scan_prefix(b"")?
            .into_iter()
            .map(|(_key, value)| UserRecord::from_slice(&value))
            .collect()
    }

    /// Counts the number of users
    pub fn count_users(&self) -> Result<usize, StoreError> {
        self.store.num_keys(USERS_TREE)
    }
}
