//! Read-only access to the external agent's own SQLite state database at
//! `{home}/state`. The schema belongs to codex; we probe for the `threads`
//! table and treat every failure as "unavailable" so the facade can fall
//! back to scanning rollout files.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use codex_agent_protocol::GitInfo;
use codex_agent_protocol::Session;
use codex_agent_protocol::SessionPage;
use codex_agent_protocol::SessionSource;
use sqlx::QueryBuilder;
use sqlx::Row;
use sqlx::Sqlite;
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::sqlite::SqliteRow;
use tracing::debug;
use uuid::Uuid;

use crate::config::normalize_path;
use crate::sessions::PageRequest;
use crate::sessions::SessionFilter;
use crate::sessions::SortDir;
use crate::sessions::SortKey;

const STATE_DB_FILENAME: &str = "state";

const THREAD_COLUMNS: &str = "id, rollout_path, created_at, updated_at, source, cwd, \
     cli_version, model_provider, title, first_user_message, archived_at, \
     git_sha, git_branch, git_origin_url, forked_from_id";

pub struct StateDb {
    pool: SqlitePool,
}

impl StateDb {
    /// Open `{home}/state` read-only and probe for the `threads` table.
    /// Returns `None` on any failure; callers scan the filesystem instead.
    pub async fn open(codex_home: &Path) -> Option<StateDb> {
        let path = codex_home.join(STATE_DB_FILENAME);
        if !path.is_file() {
            return None;
        }
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .read_only(true)
            .create_if_missing(false)
            .busy_timeout(Duration::from_secs(2));
        let pool = match SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
        {
            Ok(pool) => pool,
            Err(err) => {
                debug!("state db open failed at {}: {err}", path.display());
                return None;
            }
        };
        let probe =
            sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'threads'")
                .fetch_optional(&pool)
                .await;
        match probe {
            Ok(Some(_)) => Some(StateDb { pool }),
            Ok(None) => {
                debug!("state db at {} has no threads table", path.display());
                None
            }
            Err(err) => {
                debug!("state db probe failed at {}: {err}", path.display());
                None
            }
        }
    }

    pub async fn list(
        &self,
        filter: &SessionFilter,
        sort_key: SortKey,
        sort_dir: SortDir,
        page: PageRequest,
    ) -> Result<SessionPage, sqlx::Error> {
        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT {THREAD_COLUMNS} FROM threads"));
        push_filters(&mut builder, filter);
        let order_column = match sort_key {
            SortKey::CreatedAt => "created_at",
            SortKey::UpdatedAt => "updated_at",
        };
        let direction = match sort_dir {
            SortDir::Asc => "ASC",
            SortDir::Desc => "DESC",
        };
        builder.push(format!(" ORDER BY {order_column} {direction}, id {direction}"));
        builder.push(" LIMIT ");
        builder.push_bind(page.limit as i64);
        builder.push(" OFFSET ");
        builder.push_bind(page.offset as i64);
        let rows = builder.build().fetch_all(&self.pool).await?;
        let sessions = rows
            .iter()
            .map(session_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS n FROM threads");
        push_filters(&mut count, filter);
        let total: i64 = count.build().fetch_one(&self.pool).await?.try_get("n")?;

        Ok(SessionPage {
            sessions,
            total: usize::try_from(total).unwrap_or(0),
        })
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {THREAD_COLUMNS} FROM threads WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    pub async fn find_latest(&self, cwd: Option<&Path>) -> Result<Option<Session>, sqlx::Error> {
        let filter = SessionFilter {
            cwd: cwd.map(Path::to_path_buf),
            ..Default::default()
        };
        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT {THREAD_COLUMNS} FROM threads"));
        push_filters(&mut builder, &filter);
        builder.push(" ORDER BY created_at DESC, id DESC LIMIT 1");
        let row = builder.build().fetch_optional(&self.pool).await?;
        row.as_ref().map(session_from_row).transpose()
    }
}

fn push_filters<'a>(builder: &mut QueryBuilder<'a, Sqlite>, filter: &'a SessionFilter) {
    builder.push(" WHERE 1 = 1");
    if let Some(source) = filter.source {
        builder.push(" AND source = ");
        builder.push_bind(source.as_str());
    }
    if let Some(cwd) = &filter.cwd {
        builder.push(" AND cwd = ");
        builder.push_bind(normalize_path(cwd).display().to_string());
    }
    if let Some(branch) = &filter.git_branch {
        builder.push(" AND git_branch = ");
        builder.push_bind(branch.as_str());
    }
}

fn session_from_row(row: &SqliteRow) -> Result<Session, sqlx::Error> {
    let id: String = row.try_get("id")?;
    let id = Uuid::parse_str(&id).map_err(|err| sqlx::Error::Decode(Box::new(err)))?;
    let rollout_path: String = row.try_get("rollout_path")?;
    let created_at = epoch_to_datetime(row.try_get("created_at")?);
    let updated_at = epoch_to_datetime(row.try_get("updated_at")?);
    let source: String = row.try_get("source").unwrap_or_default();
    let cwd: String = row.try_get("cwd").unwrap_or_default();
    let cli_version: String = row.try_get("cli_version").unwrap_or_default();
    let model_provider: Option<String> = row.try_get("model_provider").ok().flatten();
    let title: String = row.try_get("title").unwrap_or_default();
    let first_user_message: Option<String> = row
        .try_get::<Option<String>, _>("first_user_message")
        .ok()
        .flatten()
        .filter(|message| !message.is_empty());
    let archived_at: Option<i64> = row.try_get("archived_at").ok().flatten();
    let git_sha: Option<String> = row.try_get("git_sha").ok().flatten();
    let git_branch: Option<String> = row.try_get("git_branch").ok().flatten();
    let git_origin_url: Option<String> = row.try_get("git_origin_url").ok().flatten();
    let forked_from_id: Option<String> = row.try_get("forked_from_id").ok().flatten();

    let git = (git_sha.is_some() || git_branch.is_some() || git_origin_url.is_some()).then(|| {
        GitInfo {
            sha: git_sha,
            branch: git_branch,
            origin_url: git_origin_url,
        }
    });
    let title = if title.is_empty() {
        first_user_message
            .clone()
            .unwrap_or_else(|| id.to_string())
    } else {
        title
    };
    Ok(Session {
        id,
        rollout_path: PathBuf::from(rollout_path),
        created_at,
        updated_at,
        source: SessionSource::from_db_str(&source),
        cwd: PathBuf::from(cwd),
        cli_version,
        model_provider,
        title,
        first_user_message,
        archived_at: archived_at.map(epoch_to_datetime),
        git,
        forked_from_id: forked_from_id.and_then(|raw| Uuid::parse_str(&raw).ok()),
    })
}

fn epoch_to_datetime(epoch_seconds: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(epoch_seconds, 0).unwrap_or_else(Utc::now)
}
