use anyhow::Context;
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use tracing::info;
use uuid::Uuid;

/// Internal user row backing a Google identity. `version_tag` is minted
/// once at creation and never changes afterwards.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub google_id: String,
    pub version_tag: String,
}

/// Access to the users table, narrow enough to stand in for during tests.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Find a user by the verified Google subject.
    async fn find_by_subject(&self, subject: &str) -> anyhow::Result<Option<User>>;

    /// Insert a user row, returning `None` when a concurrent request
    /// created it first (unique google_id).
    async fn try_create(&self, subject: &str, version_tag: &str)
        -> anyhow::Result<Option<User>>;
}

#[async_trait]
impl UserStore for PgPool {
    async fn find_by_subject(&self, subject: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, google_id, version_tag
            FROM users
            WHERE google_id = $1
            "#,
        )
        .bind(subject)
        .fetch_optional(self)
        .await?;
        Ok(user)
    }

    async fn try_create(
        &self,
        subject: &str,
        version_tag: &str,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (google_id, version_tag)
            VALUES ($1, $2)
            ON CONFLICT (google_id) DO NOTHING
            RETURNING id, google_id, version_tag
            "#,
        )
        .bind(subject)
        .bind(version_tag)
        .fetch_optional(self)
        .await?;
        Ok(user)
    }
}

impl User {
    /// Return the user for a verified subject, creating the row on first
    /// sight. When two first logins race on the unique google_id, the loser
    /// reads back the winner's row instead of failing the request.
    pub async fn resolve<S: UserStore>(store: &S, subject: &str) -> anyhow::Result<User> {
        if let Some(user) = store.find_by_subject(subject).await? {
            return Ok(user);
        }

        let version_tag = Uuid::new_v4().to_string();
        if let Some(user) = store.try_create(subject, &version_tag).await? {
            info!(user_id = user.id, "user created on first login");
            return Ok(user);
        }

        store
            .find_by_subject(subject)
            .await?
            .context("user row missing after insert conflict")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Sees no user at first, then loses the insert to a concurrent
    /// request, so the row only turns up on the second lookup.
    struct LosingStore {
        calls: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl UserStore for LosingStore {
        async fn find_by_subject(&self, subject: &str) -> anyhow::Result<Option<User>> {
            let mut calls = self.calls.lock().unwrap();
            calls.push("find");
            if calls.iter().filter(|c| **c == "find").count() == 1 {
                return Ok(None);
            }
            Ok(Some(User {
                id: 42,
                google_id: subject.to_string(),
                version_tag: "winner-tag".into(),
            }))
        }

        async fn try_create(
            &self,
            _subject: &str,
            _version_tag: &str,
        ) -> anyhow::Result<Option<User>> {
            self.calls.lock().unwrap().push("create");
            Ok(None)
        }
    }

    struct CreatingStore {
        minted_tag: Mutex<Option<String>>,
    }

    #[async_trait]
    impl UserStore for CreatingStore {
        async fn find_by_subject(&self, _subject: &str) -> anyhow::Result<Option<User>> {
            Ok(None)
        }

        async fn try_create(
            &self,
            subject: &str,
            version_tag: &str,
        ) -> anyhow::Result<Option<User>> {
            *self.minted_tag.lock().unwrap() = Some(version_tag.to_string());
            Ok(Some(User {
                id: 1,
                google_id: subject.to_string(),
                version_tag: version_tag.to_string(),
            }))
        }
    }

    #[tokio::test]
    async fn losing_a_first_login_race_reads_back_the_winner() {
        let store = LosingStore {
            calls: Mutex::new(Vec::new()),
        };

        let user = User::resolve(&store, "sub-123").await.unwrap();

        assert_eq!(user.id, 42);
        assert_eq!(user.google_id, "sub-123");
        assert_eq!(user.version_tag, "winner-tag");
        assert_eq!(*store.calls.lock().unwrap(), vec!["find", "create", "find"]);
    }

    #[tokio::test]
    async fn first_login_mints_a_uuid_version_tag() {
        let store = CreatingStore {
            minted_tag: Mutex::new(None),
        };

        let user = User::resolve(&store, "new-sub").await.unwrap();

        let tag = store.minted_tag.lock().unwrap().clone().unwrap();
        assert_eq!(user.version_tag, tag);
        assert!(Uuid::parse_str(&tag).is_ok());
    }
}
