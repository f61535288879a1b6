//! PostgREST-backed user store.
//!
//! Mirrors the hosted-database access pattern: service-key authenticated
//! REST calls with `column=eq.value` filters and
//! `Prefer: return=representation` on inserts. Selected through
//! `storage.backend = "rest"` in configuration.

use async_trait::async_trait;
use chrono::SecondsFormat;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::services::users::{
    LoginEvent, NewUser, ResetToken, StoreError, UserRecord, UserRole, UserStore,
};

const USERS_TABLE: &str = "users";
const LOGIN_HISTORY_TABLE: &str = "login_history";
const RESET_TOKENS_TABLE: &str = "password_reset_tokens";

pub struct RestUserStore {
    http: reqwest::Client,
    base_url: String,
    service_key: String,
}

impl RestUserStore {
    pub fn new(base_url: impl Into<String>, service_key: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.into(),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn select_users(&self, filter: (&str, String)) -> Result<Vec<UserRecord>, StoreError> {
        let (column, value) = filter;
        let request = self
            .http
            .get(self.table_url(USERS_TABLE))
            .query(&[(column, format!("eq.{value}")), ("select", "*".to_string())]);

        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|source| StoreError::Transport { source })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Vec<UserRecord>>()
            .await
            .map_err(|source| StoreError::Transport { source })
    }

    async fn insert_row<T: Serialize + ?Sized>(
        &self,
        table: &str,
        row: &T,
        want_representation: bool,
    ) -> Result<Option<Vec<UserRecord>>, StoreError> {
        let mut request = self.http.post(self.table_url(table)).json(row);
        if want_representation {
            request = request.header("Prefer", "return=representation");
        }

        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|source| StoreError::Transport { source })?;

        let status = response.status();
        if status.as_u16() == 409 {
            return Err(StoreError::DuplicateEmail);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        if want_representation {
            let rows = response
                .json::<Vec<UserRecord>>()
                .await
                .map_err(|source| StoreError::Transport { source })?;
            Ok(Some(rows))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl UserStore for RestUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let rows = self.select_users(("email", email.to_string())).await?;
        Ok(rows.into_iter().next())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        let rows = self.select_users(("id", id.to_string())).await?;
        Ok(rows.into_iter().next())
    }

    async fn insert(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        let row = json!({
            "email": user.email,
            "first_name": user.first_name,
            "last_name": user.last_name,
            "password_hash": user.password_hash,
            "role": user.role,
            "teacher_id": user.teacher_id,
            "age": user.age,
            "gender": user.gender,
            "organization": user.organization,
            "profile_image": user.profile_image,
        });

        let rows = self
            .insert_row(USERS_TABLE, &row, true)
            .await?
            .unwrap_or_default();
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::Payload("insert returned no representation".to_string()))
    }

    async fn users_by_role(&self, role: UserRole) -> Result<Vec<UserRecord>, StoreError> {
        self.select_users(("role", role.as_ref().to_string())).await
    }

    async fn students_of(&self, teacher_id: Uuid) -> Result<Vec<UserRecord>, StoreError> {
        self.select_users(("teacher_id", teacher_id.to_string()))
            .await
    }

    async fn record_login(&self, event: LoginEvent) -> Result<(), StoreError> {
        let row = json!({
            "user_id": event.user_id,
            "success": event.success,
            "recorded_at": event.recorded_at.to_rfc3339_opts(SecondsFormat::Micros, true),
        });
        self.insert_row(LOGIN_HISTORY_TABLE, &row, false).await?;
        Ok(())
    }

    async fn insert_reset_token(&self, token: ResetToken) -> Result<(), StoreError> {
        let row = json!({
            "user_id": token.user_id,
            "token": token.token,
            "expires_at": token.expires_at.to_rfc3339_opts(SecondsFormat::Micros, true),
        });
        self.insert_row(RESET_TOKENS_TABLE, &row, false).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_urls_normalize_trailing_slashes() {
        let store = RestUserStore::new("https://db.example.com/", "key");
        assert_eq!(
            store.table_url("users"),
            "https://db.example.com/rest/v1/users"
        );
    }
}
