use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use tracing::{debug, info};

use super::{Gender, Profile, ProfileStore, ProfileTx};
use crate::error::StoreError;

/// Profile store backed by SQLite through sqlx.
#[derive(Debug, Clone)]
pub struct SqlProfileStore {
    pool: SqlitePool,
}

impl SqlProfileStore {
    /// Connect to `url`, creating the database file if needed, and apply migrations.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!(url = %url, "profile store ready");
        Ok(store)
    }

    /// Private in-memory database. A single connection that never expires keeps
    /// the data alive for the lifetime of the pool.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for SqlProfileStore {
    async fn begin(&self) -> Result<Box<dyn ProfileTx>, StoreError> {
        // take the write lock up front; a deferred transaction that has read
        // cannot upgrade once another connection commits (SQLITE_BUSY_SNAPSHOT)
        let tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        Ok(Box::new(SqlProfileTx { tx }))
    }
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    id: String,
    name: String,
    birthday: Option<NaiveDate>,
    gender: Option<String>,
    is_admin: bool,
}

impl TryFrom<ProfileRow> for Profile {
    type Error = StoreError;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        let gender = row
            .gender
            .as_deref()
            .map(Gender::from_str)
            .transpose()
            .map_err(|reason| StoreError::Corrupt {
                uid: row.id.clone(),
                reason,
            })?;
        Ok(Profile {
            uid: row.id,
            display_name: row.name,
            birthday: row.birthday,
            gender,
            is_admin: row.is_admin,
        })
    }
}

struct SqlProfileTx {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl ProfileTx for SqlProfileTx {
    async fn find(&mut self, uid: &str) -> Result<Option<Profile>, StoreError> {
        let row = sqlx::query_as::<_, ProfileRow>(
            "SELECT id, name, birthday, gender, is_admin FROM user_profile WHERE id = ?",
        )
        .bind(uid)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Profile::try_from).transpose()
    }

    async fn insert(&mut self, profile: &Profile) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO user_profile (id, name, birthday, gender, is_admin) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&profile.uid)
        .bind(&profile.display_name)
        .bind(profile.birthday)
        .bind(profile.gender.map(|g| g.as_str()))
        .bind(profile.is_admin)
        .execute(&mut *self.tx)
        .await?;
        debug!(uid = %profile.uid, "profile row inserted");
        Ok(())
    }

    async fn update(&mut self, profile: &Profile) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE user_profile SET name = ?, birthday = ?, gender = ?, is_admin = ? WHERE id = ?",
        )
        .bind(&profile.display_name)
        .bind(profile.birthday)
        .bind(profile.gender.map(|g| g.as_str()))
        .bind(profile.is_admin)
        .bind(&profile.uid)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete(&mut self, uid: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM user_profile WHERE id = ?")
            .bind(uid)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
