// ABOUTME: Persistence for challenge instance records in SQLite
// ABOUTME: Records are inserted once, updated on renew and remove, and never deleted

use crate::providers::PortBinding;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("Instance not found: {0}")]
    NotFound(String),
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Persisted instance record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    pub id: String,
    pub user_id: String,
    pub team_id: Option<String>,
    pub game_id: Option<String>,
    pub challenge_id: String,
    pub flag: String,
    pub entries: Vec<PortBinding>,
    pub container_ref: Option<String>,
    pub removed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Set once the container is known to be gone
    pub reclaimed: bool,
}

impl Instance {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.removed_at <= now
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InstanceFilter {
    pub id: Option<String>,
    pub user_id: Option<String>,
    pub team_id: Option<String>,
    pub game_id: Option<String>,
    pub challenge_id: Option<String>,
    /// `Some(true)`: removal still in the future. `Some(false)`: already due.
    pub is_available: Option<bool>,
    pub reclaimed: Option<bool>,
    /// Include flags in query results
    #[serde(default)]
    pub detailed: bool,
    pub page: Option<u32>,
    pub size: Option<u32>,
}

/// Persistence collaborator for instance records
#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn insert_instance(&self, instance: &Instance) -> Result<()>;

    async fn update_instance(&self, instance: &Instance) -> Result<()>;

    /// Move the removal deadline of a record that is not yet reclaimed.
    /// Returns `false` when no such record exists.
    async fn extend_instance(&self, id: &str, removed_at: DateTime<Utc>) -> Result<bool>;

    async fn find_instance_by_id(&self, id: &str) -> Result<Option<Instance>>;

    async fn find_instances(&self, filter: &InstanceFilter) -> Result<Vec<Instance>>;
}

/// Open a pool for `database_url` and apply migrations
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    // Every in-memory connection is its own database
    let max_connections = if database_url.contains(":memory:") {
        1
    } else {
        5
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

/// Migrated in-memory database
pub async fn connect_memory() -> Result<SqlitePool> {
    connect("sqlite::memory:").await
}

pub struct InstanceStorage {
    pool: SqlitePool,
}

impl InstanceStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_instance(&self, row: sqlx::sqlite::SqliteRow) -> Result<Instance> {
        Ok(Instance {
            id: row.get("id"),
            user_id: row.get("user_id"),
            team_id: row.get("team_id"),
            game_id: row.get("game_id"),
            challenge_id: row.get("challenge_id"),
            flag: row.get("flag"),
            entries: serde_json::from_str(&row.get::<String, _>("entries"))?,
            container_ref: row.get("container_ref"),
            removed_at: from_unix(row.get("removed_at"))?,
            created_at: from_unix(row.get("created_at"))?,
            reclaimed: row.get("reclaimed"),
        })
    }
}

fn from_unix(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or(StorageError::InvalidTimestamp(secs))
}

#[async_trait]
impl InstanceStore for InstanceStorage {
    async fn insert_instance(&self, instance: &Instance) -> Result<()> {
        let entries_json = serde_json::to_string(&instance.entries)?;

        sqlx::query(
            r#"
            INSERT INTO instances (
                id, user_id, team_id, game_id, challenge_id, flag,
                entries, container_ref, removed_at, created_at, reclaimed
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&instance.id)
        .bind(&instance.user_id)
        .bind(&instance.team_id)
        .bind(&instance.game_id)
        .bind(&instance.challenge_id)
        .bind(&instance.flag)
        .bind(&entries_json)
        .bind(&instance.container_ref)
        .bind(instance.removed_at.timestamp())
        .bind(instance.created_at.timestamp())
        .bind(instance.reclaimed)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_instance(&self, instance: &Instance) -> Result<()> {
        let entries_json = serde_json::to_string(&instance.entries)?;

        let result = sqlx::query(
            r#"
            UPDATE instances
            SET entries = ?1, container_ref = ?2, removed_at = ?3, reclaimed = ?4
            WHERE id = ?5
            "#,
        )
        .bind(&entries_json)
        .bind(&instance.container_ref)
        .bind(instance.removed_at.timestamp())
        .bind(instance.reclaimed)
        .bind(&instance.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(instance.id.clone()));
        }

        Ok(())
    }

    async fn extend_instance(&self, id: &str, removed_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE instances
            SET removed_at = ?1
            WHERE id = ?2 AND reclaimed = 0
            "#,
        )
        .bind(removed_at.timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_instance_by_id(&self, id: &str) -> Result<Option<Instance>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, team_id, game_id, challenge_id, flag,
                   entries, container_ref, removed_at, created_at, reclaimed
            FROM instances
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| self.row_to_instance(row)).transpose()
    }

    async fn find_instances(&self, filter: &InstanceFilter) -> Result<Vec<Instance>> {
        let mut query = String::from(
            r#"
            SELECT id, user_id, team_id, game_id, challenge_id, flag,
                   entries, container_ref, removed_at, created_at, reclaimed
            FROM instances
            WHERE 1=1
            "#,
        );

        let text_filters = [
            ("id", &filter.id),
            ("user_id", &filter.user_id),
            ("team_id", &filter.team_id),
            ("game_id", &filter.game_id),
            ("challenge_id", &filter.challenge_id),
        ];

        let mut param_count = 0;
        for (column, value) in &text_filters {
            if value.is_some() {
                param_count += 1;
                query.push_str(&format!(" AND {} = ?{}", column, param_count));
            }
        }
        if let Some(available) = filter.is_available {
            param_count += 1;
            let op = if available { ">" } else { "<=" };
            query.push_str(&format!(" AND removed_at {} ?{}", op, param_count));
        }
        if filter.reclaimed.is_some() {
            param_count += 1;
            query.push_str(&format!(" AND reclaimed = ?{}", param_count));
        }
        query.push_str(" ORDER BY created_at DESC, id");

        if let Some(size) = filter.size {
            let offset = filter.page.unwrap_or(0) as i64 * size as i64;
            query.push_str(&format!(" LIMIT {} OFFSET {}", size, offset));
        }

        let mut q = sqlx::query(&query);
        for (_, value) in &text_filters {
            if let Some(v) = value {
                q = q.bind(v.as_str());
            }
        }
        if filter.is_available.is_some() {
            q = q.bind(Utc::now().timestamp());
        }
        if let Some(reclaimed) = filter.reclaimed {
            q = q.bind(reclaimed);
        }

        let rows = q.fetch_all(&self.pool).await?;

        rows.into_iter()
            .map(|row| self.row_to_instance(row))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn instance(id: &str, user: &str, removed_in_secs: i64) -> Instance {
        let now = Utc.timestamp_opt(Utc::now().timestamp(), 0).unwrap();
        Instance {
            id: id.to_string(),
            user_id: user.to_string(),
            team_id: None,
            game_id: None,
            challenge_id: "web-101".to_string(),
            flag: format!("flag{{{}}}", id),
            entries: vec![PortBinding {
                container_port: 80,
                host_port: 30000,
                entry: Some("127.0.0.1:30000".to_string()),
            }],
            container_ref: Some(format!("mem-{}", id)),
            removed_at: now + Duration::seconds(removed_in_secs),
            created_at: now,
            reclaimed: false,
        }
    }

    async fn storage() -> InstanceStorage {
        InstanceStorage::new(connect_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_insert_and_find_by_id() {
        let storage = storage().await;
        let record = instance("a", "alice", 600);
        storage.insert_instance(&record).await.unwrap();

        let loaded = storage.find_instance_by_id("a").await.unwrap();
        assert_eq!(loaded, Some(record));
        assert_eq!(storage.find_instance_by_id("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_instance() {
        let storage = storage().await;
        let mut record = instance("a", "alice", 600);
        storage.insert_instance(&record).await.unwrap();

        record.removed_at = record.created_at;
        record.reclaimed = true;
        storage.update_instance(&record).await.unwrap();

        let loaded = storage.find_instance_by_id("a").await.unwrap().unwrap();
        assert_eq!(loaded.removed_at, record.created_at);
        assert!(loaded.reclaimed);
    }

    #[tokio::test]
    async fn test_update_missing_instance() {
        let storage = storage().await;
        let err = storage
            .update_instance(&instance("ghost", "alice", 60))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn test_find_by_owner_and_availability() {
        let storage = storage().await;
        storage.insert_instance(&instance("a", "alice", 600)).await.unwrap();
        storage.insert_instance(&instance("b", "alice", -10)).await.unwrap();
        storage.insert_instance(&instance("c", "bob", 600)).await.unwrap();

        let alice = storage
            .find_instances(&InstanceFilter {
                user_id: Some("alice".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(alice.len(), 2);

        let available = storage
            .find_instances(&InstanceFilter {
                user_id: Some("alice".to_string()),
                is_available: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].id, "a");

        let due = storage
            .find_instances(&InstanceFilter {
                is_available: Some(false),
                reclaimed: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, "b");
    }

    #[tokio::test]
    async fn test_find_by_team_and_game() {
        let storage = storage().await;
        let mut record = instance("a", "alice", 600);
        record.team_id = Some("red".to_string());
        record.game_id = Some("finals".to_string());
        storage.insert_instance(&record).await.unwrap();
        storage.insert_instance(&instance("b", "bob", 600)).await.unwrap();

        let found = storage
            .find_instances(&InstanceFilter {
                team_id: Some("red".to_string()),
                game_id: Some("finals".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "a");
    }

    #[tokio::test]
    async fn test_find_paginates() {
        let storage = storage().await;
        for id in ["a", "b", "c"] {
            storage.insert_instance(&instance(id, "alice", 600)).await.unwrap();
        }

        let page = storage
            .find_instances(&InstanceFilter {
                page: Some(1),
                size: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("arena.db").display());
        let record = instance("a", "alice", 600);

        let pool = connect(&url).await.unwrap();
        InstanceStorage::new(pool.clone())
            .insert_instance(&record)
            .await
            .unwrap();
        pool.close().await;

        let reopened = InstanceStorage::new(connect(&url).await.unwrap());
        assert_eq!(reopened.find_instance_by_id("a").await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_extend_skips_reclaimed_records() {
        let storage = storage().await;
        let mut record = instance("a", "alice", 600);
        storage.insert_instance(&record).await.unwrap();

        let later = record.removed_at + Duration::seconds(300);
        assert!(storage.extend_instance("a", later).await.unwrap());
        assert_eq!(
            storage.find_instance_by_id("a").await.unwrap().unwrap().removed_at,
            later
        );

        record.removed_at = record.created_at;
        record.reclaimed = true;
        storage.update_instance(&record).await.unwrap();

        assert!(!storage.extend_instance("a", later).await.unwrap());
        assert!(!storage.extend_instance("missing", later).await.unwrap());
        let stored = storage.find_instance_by_id("a").await.unwrap().unwrap();
        assert_eq!(stored.removed_at, record.created_at);
        assert!(stored.reclaimed);
    }
}
