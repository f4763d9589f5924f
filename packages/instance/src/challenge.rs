// ABOUTME: Challenge descriptors, the catalog that serves them and flag generation
// ABOUTME: Renders the container environment for one instance from the descriptor templates

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_FLAG_ENV: &str = "FLAG";

/// Longest lifetime an instance may be given, at creation or renewal
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

static UUID_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[uuid\]").expect("placeholder pattern is valid"));

#[derive(Error, Debug)]
pub enum ChallengeError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Challenge not found: {0}")]
    NotFound(String),
    #[error("Invalid flag kind: {0}")]
    InvalidFlagKind(String),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ChallengeError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    #[default]
    Static,
    Dynamic,
}

impl FlagKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Static => "static",
            Self::Dynamic => "dynamic",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "static" => Ok(Self::Static),
            "dynamic" => Ok(Self::Dynamic),
            _ => Err(ChallengeError::InvalidFlagKind(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExposedPort {
    pub port: u16,
    #[serde(default)]
    pub description: String,
}

fn default_flag_env() -> String {
    DEFAULT_FLAG_ENV.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChallengeDescriptor {
    pub id: String,
    pub image: String,
    #[serde(default)]
    pub exposed_ports: Vec<ExposedPort>,
    /// Extra environment; values may use `{{flag}}` and `{{instance_id}}`
    #[serde(default)]
    pub env_templates: BTreeMap<String, String>,
    pub memory_limit_mb: u64,
    pub cpu_cores: f64,
    pub duration_secs: u64,
    #[serde(default)]
    pub flag_template: String,
    #[serde(default = "default_flag_env")]
    pub flag_env: String,
    #[serde(default)]
    pub flag_kind: FlagKind,
}

impl ChallengeDescriptor {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn container_ports(&self) -> Vec<u16> {
        self.exposed_ports.iter().map(|p| p.port).collect()
    }

    /// Static flags are used verbatim; dynamic flags get a fresh UUID at every `[UUID]`.
    pub fn generate_flag(&self) -> String {
        match self.flag_kind {
            FlagKind::Static => self.flag_template.clone(),
            FlagKind::Dynamic => UUID_PLACEHOLDER
                .replace_all(&self.flag_template, |_: &regex::Captures| {
                    Uuid::new_v4().simple().to_string()
                })
                .into_owned(),
        }
    }

    /// Container environment for one instance. The flag variable wins over a template of the same name.
    pub fn render_env(&self, instance_id: &str, flag: &str) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = self
            .env_templates
            .iter()
            .map(|(name, template)| {
                let value = template
                    .replace("{{flag}}", flag)
                    .replace("{{instance_id}}", instance_id);
                (name.clone(), value)
            })
            .collect();

        let flag_env = if self.flag_env.trim().is_empty() {
            DEFAULT_FLAG_ENV
        } else {
            self.flag_env.as_str()
        };
        env.insert(flag_env.to_string(), flag.to_string());
        env
    }
}

/// Source of challenge descriptors
#[async_trait]
pub trait ChallengeCatalog: Send + Sync {
    async fn get_challenge_descriptor(&self, id: &str) -> Result<ChallengeDescriptor>;
}

pub struct SqliteChallengeCatalog {
    pool: SqlitePool,
}

impl SqliteChallengeCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a descriptor
    pub async fn upsert_challenge(&self, challenge: &ChallengeDescriptor) -> Result<()> {
        let ports_json = serde_json::to_string(&challenge.exposed_ports)?;
        let env_json = serde_json::to_string(&challenge.env_templates)?;

        sqlx::query(
            r#"
            INSERT INTO challenges (
                id, image, exposed_ports, env_templates, memory_limit_mb, cpu_cores,
                duration_secs, flag_template, flag_env, flag_kind
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                image = excluded.image,
                exposed_ports = excluded.exposed_ports,
                env_templates = excluded.env_templates,
                memory_limit_mb = excluded.memory_limit_mb,
                cpu_cores = excluded.cpu_cores,
                duration_secs = excluded.duration_secs,
                flag_template = excluded.flag_template,
                flag_env = excluded.flag_env,
                flag_kind = excluded.flag_kind
            "#,
        )
        .bind(&challenge.id)
        .bind(&challenge.image)
        .bind(&ports_json)
        .bind(&env_json)
        .bind(challenge.memory_limit_mb as i64)
        .bind(challenge.cpu_cores)
        .bind(challenge.duration_secs as i64)
        .bind(&challenge.flag_template)
        .bind(&challenge.flag_env)
        .bind(challenge.flag_kind.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_challenges(&self) -> Result<Vec<ChallengeDescriptor>> {
        let rows = sqlx::query(
            r#"
            SELECT id, image, exposed_ports, env_templates, memory_limit_mb, cpu_cores,
                   duration_secs, flag_template, flag_env, flag_kind
            FROM challenges
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_challenge).collect()
    }
}

#[async_trait]
impl ChallengeCatalog for SqliteChallengeCatalog {
    async fn get_challenge_descriptor(&self, id: &str) -> Result<ChallengeDescriptor> {
        let row = sqlx::query(
            r#"
            SELECT id, image, exposed_ports, env_templates, memory_limit_mb, cpu_cores,
                   duration_secs, flag_template, flag_env, flag_kind
            FROM challenges
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_challenge(row),
            None => Err(ChallengeError::NotFound(id.to_string())),
        }
    }
}

fn row_to_challenge(row: sqlx::sqlite::SqliteRow) -> Result<ChallengeDescriptor> {
    Ok(ChallengeDescriptor {
        id: row.get("id"),
        image: row.get("image"),
        exposed_ports: serde_json::from_str(&row.get::<String, _>("exposed_ports"))?,
        env_templates: serde_json::from_str(&row.get::<String, _>("env_templates"))?,
        memory_limit_mb: row.get::<i64, _>("memory_limit_mb").max(0) as u64,
        cpu_cores: row.get("cpu_cores"),
        duration_secs: row.get::<i64, _>("duration_secs").max(0) as u64,
        flag_template: row.get("flag_template"),
        flag_env: row.get("flag_env"),
        flag_kind: FlagKind::from_str(&row.get::<String, _>("flag_kind"))?,
    })
}
