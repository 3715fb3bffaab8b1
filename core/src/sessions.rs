//! Session index facade: the SQLite fast path when codex's own state DB is
//! present, devolving to a filesystem scan of the rollout tree otherwise.
//! C3 errors never surface; they downgrade to the scan.

use std::path::Path;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::TimeZone;
use chrono::Utc;
use codex_agent_protocol::Session;
use codex_agent_protocol::SessionPage;
use codex_agent_protocol::SessionSource;
use tracing::debug;
use uuid::Uuid;

use crate::Result;
use crate::config::normalize_path;
use crate::rollout_list::HeadSummary;
use crate::rollout_list::RolloutFile;
use crate::rollout_list::discover_rollout_files;
use crate::rollout_list::read_head_summary;
use crate::state_db::StateDb;

#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub source: Option<SessionSource>,
    /// Exact match against the session cwd, after normalization.
    pub cwd: Option<PathBuf>,
    pub git_branch: Option<String>,
}

impl SessionFilter {
    fn matches(&self, session: &Session) -> bool {
        if let Some(source) = self.source
            && session.source != source
        {
            return false;
        }
        if let Some(cwd) = &self.cwd
            && normalize_path(&session.cwd) != normalize_path(cwd)
        {
            return false;
        }
        if let Some(branch) = &self.git_branch {
            let session_branch = session
                .git
                .as_ref()
                .and_then(|git| git.branch.as_deref());
            if session_branch != Some(branch.as_str()) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    CreatedAt,
    UpdatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDir {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub limit: usize,
    pub offset: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

pub struct SessionIndex {
    codex_home: PathBuf,
}

impl SessionIndex {
    pub fn new(codex_home: PathBuf) -> Self {
        Self { codex_home }
    }

    pub async fn list(
        &self,
        filter: &SessionFilter,
        sort_key: SortKey,
        sort_dir: SortDir,
        page: PageRequest,
    ) -> Result<SessionPage> {
        if let Some(db) = StateDb::open(&self.codex_home).await {
            match db.list(filter, sort_key, sort_dir, page).await {
                Ok(result) => return Ok(result),
                Err(err) => debug!("state db list failed, scanning instead: {err}"),
            }
        }
        self.scan_list(filter, sort_key, sort_dir, page).await
    }

    /// Find a session by id. The scan path narrows candidates by filename
    /// substring before opening any file; a DB miss also falls through to
    /// the scan in case the DB lags behind the filesystem.
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>> {
        if let Some(db) = StateDb::open(&self.codex_home).await {
            match db.find_by_id(id).await {
                Ok(Some(session)) => return Ok(Some(session)),
                Ok(None) => {}
                Err(err) => debug!("state db lookup failed, scanning instead: {err}"),
            }
        }
        let id_str = id.to_string();
        for file in discover_rollout_files(&self.codex_home).await? {
            let Some(name) = file.path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.contains(&id_str) {
                continue;
            }
            if let Some(session) = self.build_session(&file).await?
                && session.id == id
            {
                return Ok(Some(session));
            }
        }
        Ok(None)
    }

    /// Newest session, optionally restricted to an exact working directory.
    pub async fn find_latest(&self, cwd: Option<&Path>) -> Result<Option<Session>> {
        if let Some(db) = StateDb::open(&self.codex_home).await {
            match db.find_latest(cwd).await {
                Ok(Some(session)) => return Ok(Some(session)),
                Ok(None) => {}
                Err(err) => debug!("state db latest failed, scanning instead: {err}"),
            }
        }
        let wanted = cwd.map(normalize_path);
        for file in discover_rollout_files(&self.codex_home).await? {
            let Some(session) = self.build_session(&file).await? else {
                continue;
            };
            match &wanted {
                Some(wanted) if normalize_path(&session.cwd) != *wanted => continue,
                _ => return Ok(Some(session)),
            }
        }
        Ok(None)
    }

    /// Resolve just the rollout path for a session id, cheaply.
    pub async fn rollout_path(&self, id: Uuid) -> Result<Option<PathBuf>> {
        let id_str = id.to_string();
        for file in discover_rollout_files(&self.codex_home).await? {
            if file.id == id {
                return Ok(Some(file.path));
            }
            // Filenames are authoritative, but fall back to content for
            // files whose names were rewritten by hand.
            let Some(name) = file.path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.contains(&id_str) {
                return Ok(Some(file.path));
            }
        }
        Ok(None)
    }

    async fn scan_list(
        &self,
        filter: &SessionFilter,
        sort_key: SortKey,
        sort_dir: SortDir,
        page: PageRequest,
    ) -> Result<SessionPage> {
        let mut sessions = Vec::new();
        for file in discover_rollout_files(&self.codex_home).await? {
            let Some(session) = self.build_session(&file).await? else {
                continue;
            };
            if filter.matches(&session) {
                sessions.push(session);
            }
        }
        let key = |session: &Session| match sort_key {
            SortKey::CreatedAt => session.created_at,
            SortKey::UpdatedAt => session.updated_at,
        };
        sessions.sort_by_key(|session| std::cmp::Reverse((key(session), session.id)));
        if sort_dir == SortDir::Asc {
            sessions.reverse();
        }
        let total = sessions.len();
        let sessions = sessions
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect();
        Ok(SessionPage { sessions, total })
    }

    async fn build_session(&self, file: &RolloutFile) -> Result<Option<Session>> {
        let summary = match read_head_summary(&file.path).await {
            Ok(Some(summary)) => summary,
            Ok(None) => return Ok(None),
            Err(err) => {
                debug!("skipping unreadable rollout {}: {err}", file.path.display());
                return Ok(None);
            }
        };
        Ok(session_from_summary(file, summary).await)
    }
}

async fn session_from_summary(file: &RolloutFile, summary: HeadSummary) -> Option<Session> {
    let id = summary.id?;
    let filename_created = offset_to_chrono(file.created_at);
    let created_at = summary
        .meta_timestamp
        .as_deref()
        .and_then(parse_rfc3339)
        .unwrap_or(filename_created);
    let updated_at = tokio::fs::metadata(&file.path)
        .await
        .ok()
        .and_then(|meta| meta.modified().ok())
        .map(DateTime::<Utc>::from)
        .unwrap_or(created_at);
    let first_user_message = summary.first_user_message;
    let title = first_user_message
        .clone()
        .unwrap_or_else(|| id.to_string());
    Some(Session {
        id,
        rollout_path: file.path.clone(),
        created_at,
        updated_at,
        source: summary.source,
        cwd: summary.cwd.unwrap_or_default(),
        cli_version: summary.cli_version,
        model_provider: summary.model_provider,
        title,
        first_user_message,
        archived_at: file.archived.then_some(updated_at),
        git: summary.git,
        forked_from_id: summary.forked_from_id,
    })
}

fn parse_rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn offset_to_chrono(ts: time::OffsetDateTime) -> DateTime<Utc> {
    Utc.timestamp_opt(ts.unix_timestamp(), 0)
        .single()
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    fn meta_line(id: &str, ts: &str, cwd: &str) -> String {
        format!(
            r#"{{"timestamp":"{ts}","type":"session_meta","payload":{{"id":"{id}","timestamp":"{ts}","cwd":"{cwd}","originator":"codex_cli_rs","cli_version":"0.44.0","source":"cli"}}}}"#
        )
    }

    fn user_line(ts: &str, message: &str) -> String {
        format!(
            r#"{{"timestamp":"{ts}","type":"event_msg","payload":{{"type":"UserMessage","message":"{message}"}}}}"#
        )
    }

    async fn write_session(home: &Path, ts_file: &str, ts: &str, id: &str, cwd: &str) {
        let date = &ts_file[..10];
        let day_dir = home
            .join(crate::rollout_list::SESSIONS_SUBDIR)
            .join(&date[..4])
            .join(&date[5..7])
            .join(&date[8..10]);
        tokio::fs::create_dir_all(&day_dir).await.unwrap();
        let body = format!(
            "{}\n{}\n",
            meta_line(id, ts, cwd),
            user_line(ts, "do the thing")
        );
        tokio::fs::write(
            day_dir.join(format!("rollout-{ts_file}-{id}.jsonl")),
            body,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn find_by_id_works_without_state_db() {
        let home = tempfile::tempdir().unwrap();
        let id = "6f9a1af5-3de0-4e6e-bb8a-6a7c1bd9fa44";
        write_session(
            home.path(),
            "2025-05-01T12-00-00",
            "2025-05-01T12:00:00Z",
            id,
            "/work/a",
        )
        .await;
        write_session(
            home.path(),
            "2025-05-01T13-00-00",
            "2025-05-01T13:00:00Z",
            "1af22222-2222-4222-8222-222222222222",
            "/work/b",
        )
        .await;

        let index = SessionIndex::new(home.path().to_path_buf());
        let session = index
            .find_by_id(id.parse().unwrap())
            .await
            .unwrap()
            .expect("session should be found by scan");
        assert_eq!(session.id.to_string(), id);
        assert_eq!(session.title, "do the thing");
        assert_eq!(session.cwd, Path::new("/work/a"));
        assert!(session.archived_at.is_none());

        let missing = index
            .find_by_id("99999999-9999-4999-8999-999999999999".parse().unwrap())
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn list_filters_by_cwd_and_paginates() {
        let home = tempfile::tempdir().unwrap();
        for (hour, id, cwd) in [
            (10, "11111111-1111-4111-8111-111111111111", "/work/a"),
            (11, "22222222-2222-4222-8222-222222222222", "/work/b"),
            (12, "33333333-3333-4333-8333-333333333333", "/work/a"),
        ] {
            write_session(
                home.path(),
                &format!("2025-05-01T{hour}-00-00"),
                &format!("2025-05-01T{hour}:00:00Z"),
                id,
                cwd,
            )
            .await;
        }

        let index = SessionIndex::new(home.path().to_path_buf());
        let filter = SessionFilter {
            cwd: Some(PathBuf::from("/work/a")),
            ..Default::default()
        };
        let page = index
            .list(
                &filter,
                SortKey::CreatedAt,
                SortDir::Desc,
                PageRequest {
                    limit: 1,
                    offset: 0,
                },
            )
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.sessions.len(), 1);
        assert_eq!(
            page.sessions[0].id.to_string(),
            "33333333-3333-4333-8333-333333333333"
        );
    }

    #[tokio::test]
    async fn find_latest_respects_cwd() {
        let home = tempfile::tempdir().unwrap();
        write_session(
            home.path(),
            "2025-05-01T10-00-00",
            "2025-05-01T10:00:00Z",
            "11111111-1111-4111-8111-111111111111",
            "/work/a",
        )
        .await;
        write_session(
            home.path(),
            "2025-05-01T11-00-00",
            "2025-05-01T11:00:00Z",
            "22222222-2222-4222-8222-222222222222",
            "/work/b",
        )
        .await;

        let index = SessionIndex::new(home.path().to_path_buf());
        let latest = index.find_latest(None).await.unwrap().unwrap();
        assert_eq!(
            latest.id.to_string(),
            "22222222-2222-4222-8222-222222222222"
        );
        let latest_a = index
            .find_latest(Some(Path::new("/work/a")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            latest_a.id.to_string(),
            "11111111-1111-4111-8111-111111111111"
        );
    }
}
