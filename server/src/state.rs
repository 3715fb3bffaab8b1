use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use codex_agent_core::auth::TokenAuthenticator;
use codex_agent_core::config::AgentConfig;
use codex_agent_core::queue_run::StopSignal;
use codex_agent_core::sessions::SessionIndex;
use codex_agent_core::store::BookmarkStore;
use codex_agent_core::store::FileChangeStore;
use codex_agent_core::store::GroupStore;
use codex_agent_core::store::QueueStore;
use codex_agent_core::store::TokenStore;
use uuid::Uuid;

use crate::hub::WsHub;

/// Everything the handlers share. Stores own their documents; the hub owns
/// the tailers; stop signals of in-flight queue runs live here so the stop
/// route can reach them.
pub struct AppState {
    pub config: AgentConfig,
    pub index: Arc<SessionIndex>,
    pub groups: Arc<GroupStore>,
    pub queues: Arc<QueueStore>,
    pub bookmarks: BookmarkStore,
    pub files: FileChangeStore,
    pub auth: Arc<TokenAuthenticator>,
    pub hub: Arc<WsHub>,
    pub queue_stops: tokio::sync::Mutex<HashMap<Uuid, StopSignal>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: AgentConfig) -> Arc<Self> {
        let auth = TokenAuthenticator::new(
            TokenStore::new(&config),
            config.admin_token.clone(),
        );
        Arc::new(Self {
            index: Arc::new(SessionIndex::new(config.codex_home.clone())),
            groups: Arc::new(GroupStore::new(&config)),
            queues: Arc::new(QueueStore::new(&config)),
            bookmarks: BookmarkStore::new(&config),
            files: FileChangeStore::new(&config),
            auth: Arc::new(auth),
            hub: WsHub::new(config.codex_home.clone()),
            queue_stops: tokio::sync::Mutex::new(HashMap::new()),
            started_at: Instant::now(),
            config,
        })
    }
}
