//! User records and the store seam.
//!
//! The store is a narrow record interface: lookups by email/id, role
//! queries, and append-only side channels for login history and reset
//! tokens. The in-memory backend is the default and the one tests
//! exercise; a PostgREST-style backend lives in `rest_store`.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};
use thiserror::Error;
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UserRole {
    Teacher,
    Student,
}

/// Full stored record, password hash included. Never serialized to clients
/// directly; the HTTP layer maps it to a sanitized response shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,
    pub role: UserRole,
    pub teacher_id: Option<Uuid>,
    pub age: Option<u8>,
    pub gender: Option<String>,
    pub organization: Option<String>,
    pub profile_image: Option<String>,
    pub is_active: bool,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields required to create a user; the store assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,
    pub role: UserRole,
    pub teacher_id: Option<Uuid>,
    pub age: Option<u8>,
    pub gender: Option<String>,
    pub organization: Option<String>,
    pub profile_image: Option<String>,
}

/// Login/logout history entry, recorded best-effort.
#[derive(Debug, Clone, Serialize)]
pub struct LoginEvent {
    pub user_id: Uuid,
    pub success: bool,
    pub recorded_at: DateTime<Utc>,
}

impl LoginEvent {
    pub fn success_now(user_id: Uuid) -> Self {
        Self {
            user_id,
            success: true,
            recorded_at: Utc::now(),
        }
    }
}

/// Stored password-reset token with its expiry.
#[derive(Debug, Clone, Serialize)]
pub struct ResetToken {
    pub user_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Email already registered")]
    DuplicateEmail,
    #[error("user store request failed: {source}")]
    Transport {
        #[source]
        source: reqwest::Error,
    },
    #[error("user store returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("user store returned an unexpected payload: {0}")]
    Payload(String),
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError>;
    async fn insert(&self, user: NewUser) -> Result<UserRecord, StoreError>;
    async fn users_by_role(&self, role: UserRole) -> Result<Vec<UserRecord>, StoreError>;
    async fn students_of(&self, teacher_id: Uuid) -> Result<Vec<UserRecord>, StoreError>;
    async fn record_login(&self, event: LoginEvent) -> Result<(), StoreError>;
    async fn insert_reset_token(&self, token: ResetToken) -> Result<(), StoreError>;
}

/// Default backend: everything behind a `std` read-write lock.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, UserRecord>>,
    login_history: RwLock<Vec<LoginEvent>>,
    reset_tokens: RwLock<Vec<ResetToken>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded login-history entries, for tests and diagnostics.
    pub fn login_event_count(&self) -> usize {
        self.login_history
            .read()
            .expect("login history lock poisoned")
            .len()
    }

    /// Clear a user's active flag; returns false when the user is unknown.
    pub fn deactivate(&self, id: Uuid) -> bool {
        let mut users = self.users.write().expect("user lock poisoned");
        match users.get_mut(&id) {
            Some(user) => {
                user.is_active = false;
                true
            }
            None => false,
        }
    }

    /// Latest stored reset token for a user, for tests and diagnostics.
    pub fn latest_reset_token(&self, user_id: Uuid) -> Option<ResetToken> {
        self.reset_tokens
            .read()
            .expect("reset token lock poisoned")
            .iter()
            .rev()
            .find(|token| token.user_id == user_id)
            .cloned()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let users = self.users.read().expect("user lock poisoned");
        Ok(users.values().find(|user| user.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        let users = self.users.read().expect("user lock poisoned");
        Ok(users.get(&id).cloned())
    }

    async fn insert(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        let mut users = self.users.write().expect("user lock poisoned");
        if users.values().any(|existing| existing.email == user.email) {
            return Err(StoreError::DuplicateEmail);
        }

        let record = UserRecord {
            id: Uuid::new_v4(),
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            password_hash: user.password_hash,
            role: user.role,
            teacher_id: user.teacher_id,
            age: user.age,
            gender: user.gender,
            organization: user.organization,
            profile_image: user.profile_image,
            is_active: true,
            is_verified: false,
            created_at: Utc::now(),
        };
        users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn users_by_role(&self, role: UserRole) -> Result<Vec<UserRecord>, StoreError> {
        let users = self.users.read().expect("user lock poisoned");
        let mut matched: Vec<UserRecord> =
            users.values().filter(|user| user.role == role).cloned().collect();
        matched.sort_by_key(|user| user.created_at);
        Ok(matched)
    }

    async fn students_of(&self, teacher_id: Uuid) -> Result<Vec<UserRecord>, StoreError> {
        let users = self.users.read().expect("user lock poisoned");
        let mut matched: Vec<UserRecord> = users
            .values()
            .filter(|user| user.teacher_id == Some(teacher_id))
            .cloned()
            .collect();
        matched.sort_by_key(|user| user.created_at);
        Ok(matched)
    }

    async fn record_login(&self, event: LoginEvent) -> Result<(), StoreError> {
        self.login_history
            .write()
            .expect("login history lock poisoned")
            .push(event);
        Ok(())
    }

    async fn insert_reset_token(&self, token: ResetToken) -> Result<(), StoreError> {
        self.reset_tokens
            .write()
            .expect("reset token lock poisoned")
            .push(token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn teacher_input(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            password_hash: "$argon2id$stub".to_string(),
            role: UserRole::Teacher,
            teacher_id: None,
            age: Some(36),
            gender: None,
            organization: Some("Analytical Engines".to_string()),
            profile_image: None,
        }
    }

    fn student_input(email: &str, teacher_id: Uuid) -> NewUser {
        NewUser {
            role: UserRole::Student,
            teacher_id: Some(teacher_id),
            ..teacher_input(email)
        }
    }

    #[tokio::test]
    async fn insert_then_lookup_by_email_and_id() {
        let store = MemoryUserStore::new();
        let created = store
            .insert(teacher_input("ada@example.com"))
            .await
            .expect("insert succeeds");
        assert!(created.is_active);
        assert!(!created.is_verified);

        let by_email = store
            .find_by_email("ada@example.com")
            .await
            .expect("lookup runs")
            .expect("user found");
        assert_eq!(by_email.id, created.id);

        let by_id = store
            .find_by_id(created.id)
            .await
            .expect("lookup runs")
            .expect("user found");
        assert_eq!(by_id.email, "ada@example.com");
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = MemoryUserStore::new();
        store
            .insert(teacher_input("ada@example.com"))
            .await
            .expect("first insert succeeds");
        let error = store
            .insert(teacher_input("ada@example.com"))
            .await
            .expect_err("duplicate must fail");
        assert!(matches!(error, StoreError::DuplicateEmail));
    }

    #[tokio::test]
    async fn role_and_teacher_queries_filter_correctly() {
        let store = MemoryUserStore::new();
        let teacher = store
            .insert(teacher_input("ada@example.com"))
            .await
            .expect("teacher insert");
        store
            .insert(student_input("s1@example.com", teacher.id))
            .await
            .expect("student insert");
        store
            .insert(student_input("s2@example.com", teacher.id))
            .await
            .expect("student insert");
        store
            .insert(student_input("s3@example.com", Uuid::new_v4()))
            .await
            .expect("student insert");

        let teachers = store
            .users_by_role(UserRole::Teacher)
            .await
            .expect("query runs");
        assert_eq!(teachers.len(), 1);

        let students = store.students_of(teacher.id).await.expect("query runs");
        assert_eq!(students.len(), 2);
        assert!(students.iter().all(|s| s.teacher_id == Some(teacher.id)));
    }

    #[tokio::test]
    async fn side_channels_append() {
        let store = MemoryUserStore::new();
        let user_id = Uuid::new_v4();
        store
            .record_login(LoginEvent::success_now(user_id))
            .await
            .expect("record runs");
        assert_eq!(store.login_event_count(), 1);

        store
            .insert_reset_token(ResetToken {
                user_id,
                token: "tok".to_string(),
                expires_at: Utc::now(),
            })
            .await
            .expect("insert runs");
        assert_eq!(
            store.latest_reset_token(user_id).map(|t| t.token),
            Some("tok".to_string())
        );
    }
}
