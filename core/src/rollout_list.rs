//! Discovery of rollout files under the codex home directory.
//!
//! Layout: `{home}/sessions/YYYY/MM/DD/rollout-YYYY-MM-DDThh-mm-ss-<uuid>.jsonl`
//! plus the flat `{home}/archived_sessions/` directory. Filenames embed the
//! creation timestamp, so lexicographic descending order within a day equals
//! newest-first.

use std::cmp::Reverse;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use codex_agent_protocol::EventMsg;
use codex_agent_protocol::GitInfo;
use codex_agent_protocol::RolloutItem;
use codex_agent_protocol::SessionSource;
use codex_agent_protocol::parse_rollout_line;
use time::OffsetDateTime;
use time::PrimitiveDateTime;
use time::format_description::FormatItem;
use time::macros::format_description;
use tokio::io::AsyncBufReadExt;
use uuid::Uuid;

pub const SESSIONS_SUBDIR: &str = "sessions";
pub const ARCHIVED_SESSIONS_SUBDIR: &str = "archived_sessions";

/// Hard cap to bound worst-case work per scan.
pub const MAX_SCAN_FILES: usize = 10_000;

/// Records to read from the head of a file when summarizing it.
const HEAD_RECORD_LIMIT: usize = 10;
/// Extra records to scan past the head looking for the first user message.
const USER_MESSAGE_SCAN_LIMIT: usize = 200;

/// A discovered rollout file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutFile {
    pub path: PathBuf,
    pub created_at: OffsetDateTime,
    pub id: Uuid,
    pub archived: bool,
}

/// Enumerate rollout files newest-first: the date-partitioned tree in
/// (year, month, day, filename) descending order, then the flat archived
/// directory. Missing directories yield an empty portion, not an error.
pub async fn discover_rollout_files(codex_home: &Path) -> io::Result<Vec<RolloutFile>> {
    let mut files = Vec::new();
    let mut scanned = 0usize;

    let root = codex_home.join(SESSIONS_SUBDIR);
    if root.is_dir() {
        walk_dated_tree(&root, &mut scanned, &mut files).await?;
    }

    let archived_root = codex_home.join(ARCHIVED_SESSIONS_SUBDIR);
    if archived_root.is_dir() {
        let mut archived = collect_rollout_day_files(&archived_root, true).await?;
        archived.truncate(MAX_SCAN_FILES.saturating_sub(scanned));
        files.append(&mut archived);
    }

    Ok(files)
}

/// Convenience wrapper returning paths only.
pub async fn discover_rollout_paths(codex_home: &Path) -> io::Result<Vec<PathBuf>> {
    Ok(discover_rollout_files(codex_home)
        .await?
        .into_iter()
        .map(|file| file.path)
        .collect())
}

async fn walk_dated_tree(
    root: &Path,
    scanned: &mut usize,
    out: &mut Vec<RolloutFile>,
) -> io::Result<()> {
    let year_dirs = collect_dirs_desc(root, |s| s.parse::<u16>().ok()).await?;
    'outer: for (_year, year_path) in year_dirs {
        let month_dirs = collect_dirs_desc(&year_path, |s| s.parse::<u8>().ok()).await?;
        for (_month, month_path) in month_dirs {
            let day_dirs = collect_dirs_desc(&month_path, |s| s.parse::<u8>().ok()).await?;
            for (_day, day_path) in day_dirs {
                for file in collect_rollout_day_files(&day_path, false).await? {
                    if *scanned >= MAX_SCAN_FILES {
                        break 'outer;
                    }
                    *scanned += 1;
                    out.push(file);
                }
            }
        }
    }
    Ok(())
}

/// Collects immediate subdirectories of `parent`, parses their names with
/// `parse`, and returns them sorted descending by the parsed key.
async fn collect_dirs_desc<T, F>(parent: &Path, parse: F) -> io::Result<Vec<(T, PathBuf)>>
where
    T: Ord + Copy,
    F: Fn(&str) -> Option<T>,
{
    let mut dir = match tokio::fs::read_dir(parent).await {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    let mut collected: Vec<(T, PathBuf)> = Vec::new();
    while let Some(entry) = dir.next_entry().await? {
        if entry
            .file_type()
            .await
            .map(|ft| ft.is_dir())
            .unwrap_or(false)
            && let Some(name) = entry.file_name().to_str()
            && let Some(key) = parse(name)
        {
            collected.push((key, entry.path()));
        }
    }
    collected.sort_by_key(|(key, _)| Reverse(*key));
    Ok(collected)
}

async fn collect_rollout_day_files(dir: &Path, archived: bool) -> io::Result<Vec<RolloutFile>> {
    let mut read_dir = match tokio::fs::read_dir(dir).await {
        Ok(read_dir) => read_dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    let mut files = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        if !entry
            .file_type()
            .await
            .map(|ft| ft.is_file())
            .unwrap_or(false)
        {
            continue;
        }
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let Some((created_at, id)) = parse_timestamp_uuid_from_filename(name) else {
            continue;
        };
        files.push(RolloutFile {
            path: entry.path(),
            created_at,
            id,
            archived,
        });
    }
    // Stable ordering within the same second: (timestamp desc, uuid desc).
    files.sort_by_key(|file| (Reverse(file.created_at), Reverse(file.id)));
    Ok(files)
}

/// Parse `rollout-YYYY-MM-DDThh-mm-ss-<uuid>.jsonl`. The UUID is found by
/// scanning separators from the right, so dashes inside the UUID cannot
/// confuse the split.
pub fn parse_timestamp_uuid_from_filename(name: &str) -> Option<(OffsetDateTime, Uuid)> {
    let core = name.strip_prefix("rollout-")?.strip_suffix(".jsonl")?;
    let (sep_idx, uuid) = core
        .match_indices('-')
        .rev()
        .find_map(|(i, _)| Uuid::parse_str(&core[i + 1..]).ok().map(|u| (i, u)))?;
    let ts_str = &core[..sep_idx];
    let format: &[FormatItem] =
        format_description!("[year]-[month]-[day]T[hour]-[minute]-[second]");
    let ts = PrimitiveDateTime::parse(ts_str, format).ok()?.assume_utc();
    Some((ts, uuid))
}

/// What the head of a rollout file tells us about its session.
#[derive(Debug, Clone, Default)]
pub struct HeadSummary {
    pub id: Option<Uuid>,
    pub meta_timestamp: Option<String>,
    pub cwd: Option<PathBuf>,
    pub source: SessionSource,
    pub cli_version: String,
    pub model_provider: Option<String>,
    pub forked_from_id: Option<Uuid>,
    pub git: Option<GitInfo>,
    pub first_user_message: Option<String>,
}

/// Read the head of a rollout: the session meta must be the first parseable
/// record; a bounded number of further records are scanned for the first
/// user message. Returns `None` when the file does not start with session
/// metadata.
pub async fn read_head_summary(path: &Path) -> io::Result<Option<HeadSummary>> {
    let file = tokio::fs::File::open(path).await?;
    let reader = tokio::io::BufReader::new(file);
    let mut lines = reader.lines();
    let mut summary = HeadSummary::default();
    let mut records = 0usize;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        records += 1;
        let Some(rollout_line) = parse_rollout_line(&line) else {
            if summary.id.is_none() {
                return Ok(None);
            }
            continue;
        };
        match rollout_line.item {
            RolloutItem::SessionMeta(meta_line) => {
                if summary.id.is_none() {
                    summary.id = Some(meta_line.meta.id);
                    summary.meta_timestamp = Some(meta_line.meta.timestamp.clone());
                    summary.cwd = Some(meta_line.meta.cwd.clone());
                    summary.source = meta_line.meta.source;
                    summary.cli_version = meta_line.meta.cli_version.clone();
                    summary.model_provider = meta_line.meta.model_provider.clone();
                    summary.forked_from_id = meta_line.meta.forked_from_id;
                    summary.git = meta_line.git;
                }
            }
            RolloutItem::EventMsg(EventMsg::UserMessage(user)) => {
                if summary.first_user_message.is_none() {
                    let message = user.message.trim();
                    if !message.is_empty() {
                        summary.first_user_message = Some(message.to_string());
                    }
                }
            }
            _ => {}
        }
        if summary.id.is_none() {
            // The very first record was not session metadata.
            return Ok(None);
        }
        if summary.first_user_message.is_some()
            || records >= HEAD_RECORD_LIMIT + USER_MESSAGE_SCAN_LIMIT
        {
            break;
        }
    }

    Ok(if summary.id.is_some() {
        Some(summary)
    } else {
        None
    })
}
