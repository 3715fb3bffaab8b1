use std::path::Path;
use std::path::PathBuf;

/// Runtime configuration, resolved once at startup from the environment.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Root of the external agent's home directory (`CODEX_HOME`,
    /// default `~/.codex`). Rollouts and the state DB live here; we only
    /// ever read from it.
    pub codex_home: PathBuf,
    /// Our own durable documents (`~/.config/codex-agent`).
    pub config_dir: PathBuf,
    pub host: String,
    pub port: u16,
    /// Ambient super-token (`CODEX_AGENT_TOKEN`); grants every permission.
    pub admin_token: Option<String>,
    pub transport: Transport,
    /// Name (or path) of the external agent binary.
    pub agent_bin: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    #[default]
    LocalCli,
    AppServer,
}

impl Transport {
    pub fn as_str(self) -> &'static str {
        match self {
            Transport::LocalCli => "local-cli",
            Transport::AppServer => "app-server",
        }
    }
}

pub const DEFAULT_PORT: u16 = 3100;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_AGENT_BIN: &str = "codex";

impl AgentConfig {
    pub fn from_env() -> Self {
        let codex_home = std::env::var_os("CODEX_HOME")
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|home| home.join(".codex")))
            .unwrap_or_else(|| PathBuf::from(".codex"));
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("codex-agent");
        let port = std::env::var("CODEX_AGENT_PORT")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let host =
            std::env::var("CODEX_AGENT_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let admin_token = std::env::var("CODEX_AGENT_TOKEN")
            .ok()
            .filter(|token| !token.is_empty());
        let transport = match std::env::var("CODEX_AGENT_TRANSPORT").as_deref() {
            Ok("app-server") => Transport::AppServer,
            _ => Transport::LocalCli,
        };
        let agent_bin = std::env::var("CODEX_AGENT_BIN")
            .unwrap_or_else(|_| DEFAULT_AGENT_BIN.to_string());
        Self {
            codex_home,
            config_dir,
            host,
            port,
            admin_token,
            transport,
            agent_bin,
        }
    }

    /// Configuration rooted at explicit directories, for tests.
    pub fn with_dirs(codex_home: impl Into<PathBuf>, config_dir: impl Into<PathBuf>) -> Self {
        Self {
            codex_home: codex_home.into(),
            config_dir: config_dir.into(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            admin_token: None,
            transport: Transport::LocalCli,
            agent_bin: DEFAULT_AGENT_BIN.to_string(),
        }
    }

    pub fn groups_path(&self) -> PathBuf {
        self.config_dir.join("groups.json")
    }

    pub fn queues_path(&self) -> PathBuf {
        self.config_dir.join("queues.json")
    }

    pub fn bookmarks_path(&self) -> PathBuf {
        self.config_dir.join("bookmarks.json")
    }

    pub fn tokens_path(&self) -> PathBuf {
        self.config_dir.join("tokens.json")
    }

    pub fn file_changes_path(&self) -> PathBuf {
        self.config_dir.join("file-changes-index.json")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.config_dir.join("daemon.pid")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.codex_home.join(crate::rollout_list::SESSIONS_SUBDIR)
    }

    pub fn state_db_path(&self) -> PathBuf {
        self.codex_home.join("state")
    }
}

/// Best-effort absolute-path normalization for resolved-path equality
/// (`cwd` filters, file lookups). Does not touch the filesystem, so
/// dangling paths still normalize.
pub fn normalize_path(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
