use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, User};

const USER_COLUMNS: &str = "id, username, email, password_hash, reset_token_hash, \
     reset_token_expires_at, created_at, updated_at";

/// Column guarded by a unique constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Username,
    Email,
}

impl UniqueField {
    pub fn as_str(self) -> &'static str {
        match self {
            UniqueField::Username => "username",
            UniqueField::Email => "email",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("{} is already taken", .0.as_str())]
    Duplicate(UniqueField),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Credential store. Uniqueness of username and email is the store's job.
#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create(&self, new: NewUser) -> Result<User, RepoError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepoError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepoError>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepoError>;

    /// Store a pending reset token hash with its expiry.
    async fn set_reset_token(
        &self,
        id: Uuid,
        token_hash: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), RepoError>;

    async fn clear_reset_token(&self, id: Uuid) -> Result<(), RepoError>;

    /// User whose reset token hash matches and whose expiry is after `now`.
    async fn find_by_reset_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, RepoError>;

    /// Replace the password and clear the reset fields, provided the user
    /// still holds `token_hash`. Returns `None` if the token was consumed
    /// concurrently.
    async fn complete_password_reset(
        &self,
        id: Uuid,
        token_hash: &str,
        password_hash: &str,
    ) -> Result<Option<User>, RepoError>;
}

/// PostgreSQL-backed [`UserRepo`].
#[derive(Clone)]
pub struct PgUserRepo {
    db: PgPool,
}

impl PgUserRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_unique_violation(e: sqlx::Error) -> RepoError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            match db_err.constraint() {
                Some("users_username_key") => return RepoError::Duplicate(UniqueField::Username),
                Some("users_email_key") => return RepoError::Duplicate(UniqueField::Email),
                _ => {}
            }
        }
    }
    RepoError::Database(e)
}

#[async_trait]
impl UserRepo for PgUserRepo {
    async fn create(&self, new: NewUser) -> Result<User, RepoError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&new.username)
        .bind(&new.email)
        .bind(&new.password_hash)
        .fetch_one(&self.db)
        .await
        .map_err(map_unique_violation)?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepoError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepoError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepoError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        token_hash: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            UPDATE users
            SET reset_token_hash = $2, reset_token_expires_at = $3, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(token_hash)
        .bind(expires_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn clear_reset_token(&self, id: Uuid) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            UPDATE users
            SET reset_token_hash = NULL, reset_token_expires_at = NULL, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn find_by_reset_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, RepoError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE reset_token_hash = $1 AND reset_token_expires_at > $2
            "#
        ))
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn complete_password_reset(
        &self,
        id: Uuid,
        token_hash: &str,
        password_hash: &str,
    ) -> Result<Option<User>, RepoError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET password_hash = $3,
                reset_token_hash = NULL,
                reset_token_expires_at = NULL,
                updated_at = now()
            WHERE id = $1 AND reset_token_hash = $2
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(token_hash)
        .bind(password_hash)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }
}

/// In-process store used by the router tests.
#[cfg(test)]
pub mod memory {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct InMemoryUserRepo {
        users: Mutex<Vec<User>>,
    }

    impl InMemoryUserRepo {
        pub fn snapshot(&self, email: &str) -> Option<User> {
            self.users
                .lock()
                .unwrap()
                .iter()
                .find(|u| u.email == email)
                .cloned()
        }

        /// Move a pending reset token's expiry, e.g. into the past.
        pub fn set_reset_expiry(&self, email: &str, expires_at: OffsetDateTime) {
            let mut users = self.users.lock().unwrap();
            if let Some(u) = users.iter_mut().find(|u| u.email == email) {
                u.reset_token_expires_at = Some(expires_at);
            }
        }
    }

    #[async_trait]
    impl UserRepo for InMemoryUserRepo {
        async fn create(&self, new: NewUser) -> Result<User, RepoError> {
            let mut users = self.users.lock().unwrap();
            if users.iter().any(|u| u.username == new.username) {
                return Err(RepoError::Duplicate(UniqueField::Username));
            }
            if users.iter().any(|u| u.email == new.email) {
                return Err(RepoError::Duplicate(UniqueField::Email));
            }
            let now = OffsetDateTime::now_utc();
            let user = User {
                id: Uuid::new_v4(),
                username: new.username,
                email: new.email,
                password_hash: new.password_hash,
                reset_token_hash: None,
                reset_token_expires_at: None,
                created_at: now,
                updated_at: now,
            };
            users.push(user.clone());
            Ok(user)
        }

        async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepoError> {
            Ok(self.users.lock().unwrap().iter().find(|u| u.id == id).cloned())
        }

        async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepoError> {
            Ok(self.snapshot(email))
        }

        async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepoError> {
            Ok(self
                .users
                .lock()
                .unwrap()
                .iter()
                .find(|u| u.username == username)
                .cloned())
        }

        async fn set_reset_token(
            &self,
            id: Uuid,
            token_hash: &str,
            expires_at: OffsetDateTime,
        ) -> Result<(), RepoError> {
            let mut users = self.users.lock().unwrap();
            if let Some(u) = users.iter_mut().find(|u| u.id == id) {
                u.reset_token_hash = Some(token_hash.to_string());
                u.reset_token_expires_at = Some(expires_at);
            }
            Ok(())
        }

        async fn clear_reset_token(&self, id: Uuid) -> Result<(), RepoError> {
            let mut users = self.users.lock().unwrap();
            if let Some(u) = users.iter_mut().find(|u| u.id == id) {
                u.reset_token_hash = None;
                u.reset_token_expires_at = None;
            }
            Ok(())
        }

        async fn find_by_reset_token(
            &self,
            token_hash: &str,
            now: OffsetDateTime,
        ) -> Result<Option<User>, RepoError> {
            Ok(self
                .users
                .lock()
                .unwrap()
                .iter()
                .find(|u| {
                    u.reset_token_hash.as_deref() == Some(token_hash)
                        && u.reset_token_expires_at.is_some_and(|exp| exp > now)
                })
                .cloned())
        }

        async fn complete_password_reset(
            &self,
            id: Uuid,
            token_hash: &str,
            password_hash: &str,
        ) -> Result<Option<User>, RepoError> {
            let mut users = self.users.lock().unwrap();
            let Some(u) = users
                .iter_mut()
                .find(|u| u.id == id && u.reset_token_hash.as_deref() == Some(token_hash))
            else {
                return Ok(None);
            };
            u.password_hash = password_hash.to_string();
            u.reset_token_hash = None;
            u.reset_token_expires_at = None;
            u.updated_at = OffsetDateTime::now_utc();
            Ok(Some(u.clone()))
        }
    }

    mod tests {
        use time::Duration;

        use super::*;

        fn new_user(username: &str, email: &str) -> NewUser {
            NewUser {
                username: username.into(),
                email: email.into(),
                password_hash: "$argon2id$fake".into(),
            }
        }

        #[tokio::test]
        async fn duplicate_username_and_email_are_rejected() {
            let repo = InMemoryUserRepo::default();
            repo.create(new_user("alice", "a@example.com")).await.unwrap();

            let err = repo.create(new_user("alice", "b@example.com")).await.unwrap_err();
            assert!(matches!(err, RepoError::Duplicate(UniqueField::Username)));
            let err = repo.create(new_user("bob", "a@example.com")).await.unwrap_err();
            assert!(matches!(err, RepoError::Duplicate(UniqueField::Email)));
        }

        #[tokio::test]
        async fn reset_token_lookup_respects_expiry() {
            let repo = InMemoryUserRepo::default();
            let user = repo.create(new_user("alice", "a@example.com")).await.unwrap();
            let now = OffsetDateTime::now_utc();
            repo.set_reset_token(user.id, "h", now + Duration::minutes(10))
                .await
                .unwrap();

            assert!(repo.find_by_reset_token("h", now).await.unwrap().is_some());
            assert!(repo.find_by_reset_token("other", now).await.unwrap().is_none());
            assert!(repo
                .find_by_reset_token("h", now + Duration::minutes(11))
                .await
                .unwrap()
                .is_none());
        }

        #[tokio::test]
        async fn completed_reset_cannot_be_replayed() {
            let repo = InMemoryUserRepo::default();
            let user = repo.create(new_user("alice", "a@example.com")).await.unwrap();
            let now = OffsetDateTime::now_utc();
            repo.set_reset_token(user.id, "h", now + Duration::minutes(10))
                .await
                .unwrap();

            let updated = repo
                .complete_password_reset(user.id, "h", "new-hash")
                .await
                .unwrap()
                .expect("first use succeeds");
            assert_eq!(updated.password_hash, "new-hash");
            assert!(updated.reset_token_hash.is_none());

            assert!(repo
                .complete_password_reset(user.id, "h", "again")
                .await
                .unwrap()
                .is_none());
            assert!(repo.find_by_reset_token("h", now).await.unwrap().is_none());
        }
    }
}
