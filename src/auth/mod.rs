pub mod manager;
pub mod password;
pub mod session;
pub mod user_store;

pub use manager::{SessionConfig, SessionManager, ValidatedSession, SESSION_COOKIE_NAME};
pub use password::{PasswordError, PasswordHasher};
pub use session::{Session, SessionStore};
pub use user_store::{CreateUserError, UserRecord, UserStore};
