//! Configuration for threadstore
//!
//! Every field has a default, so an empty document (or no environment) yields a
//! working local setup. `HistoryConfig::from_env` reads `THREADSTORE_*`
//! variables on top of the defaults.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{HistoryError, Result};
use crate::storage::ThroughputMode;
use crate::types::NEVER_EXPIRE;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "THREADSTORE_";

/// Lowest provisioned throughput accepted
pub const MIN_THROUGHPUT: u32 = 400;
/// Highest provisioned throughput accepted
pub const MAX_THROUGHPUT: u32 = 1_000_000;

/// Document store location and layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database (`~` is expanded, `:memory:` for in-memory)
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_database_name")]
    pub database_name: String,
    #[serde(default = "default_conversations_container")]
    pub conversations_container: String,
    #[serde(default = "default_messages_container")]
    pub messages_container: String,
    #[serde(default)]
    pub throughput_mode: ThroughputMode,
    /// Autoscale ceiling, used in provisioned mode
    #[serde(default = "default_max_throughput")]
    pub max_throughput: u32,
}

fn default_db_path() -> String {
    "~/.local/share/threadstore/history.db".to_string()
}

fn default_database_name() -> String {
    "chat_history_db".to_string()
}

fn default_conversations_container() -> String {
    "conversations".to_string()
}

fn default_messages_container() -> String {
    "messages".to_string()
}

fn default_max_throughput() -> u32 {
    4000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            database_name: default_database_name(),
            conversations_container: default_conversations_container(),
            messages_container: default_messages_container(),
            throughput_mode: ThroughputMode::default(),
            max_throughput: default_max_throughput(),
        }
    }
}

impl StoreConfig {
    /// Defaults pointed at a private in-memory database
    pub fn in_memory() -> Self {
        Self {
            db_path: crate::storage::IN_MEMORY.to_string(),
            ..Default::default()
        }
    }

    /// Database path with `~` expanded
    pub fn expanded_db_path(&self) -> String {
        shellexpand::tilde(&self.db_path).to_string()
    }
}

/// History manager behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatHistoryConfig {
    /// Tenant every conversation of this manager belongs to
    #[serde(default = "default_tenant_id")]
    pub tenant_id: String,
    #[serde(default)]
    pub enable_ttl: bool,
    #[serde(default = "default_ttl")]
    pub conversation_ttl_seconds: i64,
    #[serde(default = "default_ttl")]
    pub message_ttl_seconds: i64,
    /// Replaces both TTLs when `development_mode` is on
    #[serde(default = "default_ttl")]
    pub development_ttl_seconds: i64,
    #[serde(default)]
    pub development_mode: bool,
}

fn default_tenant_id() -> String {
    "default_tenant".to_string()
}

fn default_ttl() -> i64 {
    NEVER_EXPIRE
}

impl Default for ChatHistoryConfig {
    fn default() -> Self {
        Self {
            tenant_id: default_tenant_id(),
            enable_ttl: false,
            conversation_ttl_seconds: NEVER_EXPIRE,
            message_ttl_seconds: NEVER_EXPIRE,
            development_ttl_seconds: NEVER_EXPIRE,
            development_mode: false,
        }
    }
}

impl ChatHistoryConfig {
    /// TTL applied to new conversations
    pub fn conversation_ttl(&self) -> i64 {
        self.effective_ttl(self.conversation_ttl_seconds)
    }

    /// TTL applied to new messages
    pub fn message_ttl(&self) -> i64 {
        self.effective_ttl(self.message_ttl_seconds)
    }

    fn effective_ttl(&self, configured: i64) -> i64 {
        if !self.enable_ttl {
            NEVER_EXPIRE
        } else if self.development_mode {
            self.development_ttl_seconds
        } else {
            configured
        }
    }
}

/// Search engine behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSettings {
    #[serde(default = "default_true")]
    pub enable_cache: bool,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
    #[serde(default = "default_max_cache_entries")]
    pub max_cache_entries: usize,
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_max_cache_entries() -> usize {
    100
}

fn default_page_size() -> usize {
    20
}

fn default_max_page_size() -> usize {
    100
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            enable_cache: true,
            cache_ttl_seconds: default_cache_ttl(),
            max_cache_entries: default_max_cache_entries(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

/// Complete configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub history: ChatHistoryConfig,
    #[serde(default)]
    pub search: SearchSettings,
}

impl HistoryConfig {
    /// Defaults on top of the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults on top of whatever `lookup` returns for each `THREADSTORE_*` key
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
        let mut config = Self::default();

        if let Some(v) = get("DB_PATH") {
            config.store.db_path = v;
        }
        if let Some(v) = get("DATABASE_NAME") {
            config.store.database_name = v;
        }
        if let Some(v) = get("CONVERSATIONS_CONTAINER") {
            config.store.conversations_container = v;
        }
        if let Some(v) = get("MESSAGES_CONTAINER") {
            config.store.messages_container = v;
        }
        if let Some(v) = parse(&get, "THROUGHPUT_MODE")? {
            config.store.throughput_mode = v;
        }
        if let Some(v) = parse(&get, "MAX_THROUGHPUT")? {
            config.store.max_throughput = v;
        }

        if let Some(v) = get("TENANT_ID") {
            config.history.tenant_id = v;
        }
        if let Some(v) = parse(&get, "ENABLE_TTL")? {
            config.history.enable_ttl = v;
        }
        if let Some(v) = parse(&get, "CONVERSATION_TTL_SECONDS")? {
            config.history.conversation_ttl_seconds = v;
        }
        if let Some(v) = parse(&get, "MESSAGE_TTL_SECONDS")? {
            config.history.message_ttl_seconds = v;
        }
        if let Some(v) = parse(&get, "DEVELOPMENT_TTL_SECONDS")? {
            config.history.development_ttl_seconds = v;
        }
        if let Some(v) = parse(&get, "DEVELOPMENT_MODE")? {
            config.history.development_mode = v;
        }

        if let Some(v) = parse(&get, "ENABLE_CACHE")? {
            config.search.enable_cache = v;
        }
        if let Some(v) = parse(&get, "CACHE_TTL_SECONDS")? {
            config.search.cache_ttl_seconds = v;
        }
        if let Some(v) = parse(&get, "MAX_CACHE_ENTRIES")? {
            config.search.max_cache_entries = v;
        }
        if let Some(v) = parse(&get, "DEFAULT_PAGE_SIZE")? {
            config.search.default_page_size = v;
        }
        if let Some(v) = parse(&get, "MAX_PAGE_SIZE")? {
            config.search.max_page_size = v;
        }

        Ok(config)
    }

    /// Check every setting, reporting all problems at once
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        for (label, name) in [
            ("database_name", &self.store.database_name),
            ("conversations_container", &self.store.conversations_container),
            ("messages_container", &self.store.messages_container),
        ] {
            if crate::storage::validate_identifier(name).is_err() {
                problems.push(format!("{} '{}' is not a valid name", label, name));
            }
        }
        if self.store.conversations_container == self.store.messages_container {
            problems.push("conversations and messages containers must differ".to_string());
        }
        if self.store.db_path.trim().is_empty() {
            problems.push("db_path is empty".to_string());
        }
        if self.store.throughput_mode == ThroughputMode::Provisioned
            && !(MIN_THROUGHPUT..=MAX_THROUGHPUT).contains(&self.store.max_throughput)
        {
            problems.push(format!(
                "max_throughput {} is outside {}..={}",
                self.store.max_throughput, MIN_THROUGHPUT, MAX_THROUGHPUT
            ));
        }

        if self.history.tenant_id.trim().is_empty() {
            problems.push("tenant_id is empty".to_string());
        }
        for (label, ttl) in [
            ("conversation_ttl_seconds", self.history.conversation_ttl_seconds),
            ("message_ttl_seconds", self.history.message_ttl_seconds),
            ("development_ttl_seconds", self.history.development_ttl_seconds),
        ] {
            if ttl == 0 || ttl < NEVER_EXPIRE {
                problems.push(format!("{} must be -1 or positive, got {}", label, ttl));
            }
        }

        if self.search.max_page_size == 0 {
            problems.push("max_page_size must be positive".to_string());
        }
        if self.search.default_page_size == 0
            || self.search.default_page_size > self.search.max_page_size
        {
            problems.push(format!(
                "default_page_size {} must be within 1..={}",
                self.search.default_page_size, self.search.max_page_size
            ));
        }
        if self.search.enable_cache && self.search.max_cache_entries == 0 {
            problems.push("max_cache_entries must be positive when caching".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(HistoryError::Config(problems.join("; ")))
        }
    }
}

fn parse<T, G>(get: &G, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            HistoryError::Config(format!("{}{}='{}': {}", ENV_PREFIX, name, raw, e))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (format!("{}{}", ENV_PREFIX, k), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = HistoryConfig::default();
        assert_eq!(config.store.database_name, "chat_history_db");
        assert_eq!(config.store.conversations_container, "conversations");
        assert_eq!(config.store.messages_container, "messages");
        assert_eq!(config.store.max_throughput, 4000);
        assert_eq!(config.history.tenant_id, "default_tenant");
        assert_eq!(config.history.conversation_ttl(), NEVER_EXPIRE);
        assert_eq!(config.search.cache_ttl_seconds, 300);
        assert_eq!(config.search.max_cache_entries, 100);
        assert_eq!(config.search.default_page_size, 20);
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_document_deserializes_to_defaults() {
        let config: HistoryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, HistoryConfig::default());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = HistoryConfig::from_lookup(lookup(&[
            ("TENANT_ID", "acme"),
            ("THROUGHPUT_MODE", "provisioned"),
            ("MAX_THROUGHPUT", "10000"),
            ("ENABLE_CACHE", "false"),
            ("MAX_PAGE_SIZE", "50"),
        ]))
        .unwrap();

        assert_eq!(config.history.tenant_id, "acme");
        assert_eq!(config.store.throughput_mode, ThroughputMode::Provisioned);
        assert_eq!(config.store.max_throughput, 10000);
        assert!(!config.search.enable_cache);
        assert_eq!(config.search.max_page_size, 50);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = HistoryConfig::from_lookup(lookup(&[("MAX_THROUGHPUT", "lots")])).unwrap_err();
        assert!(err.to_string().contains("THREADSTORE_MAX_THROUGHPUT"));
    }

    #[test]
    fn test_ttl_resolution() {
        let mut history = ChatHistoryConfig {
            conversation_ttl_seconds: 86400,
            message_ttl_seconds: 3600,
            development_ttl_seconds: 60,
            ..Default::default()
        };
        assert_eq!(history.conversation_ttl(), NEVER_EXPIRE);

        history.enable_ttl = true;
        assert_eq!(history.conversation_ttl(), 86400);
        assert_eq!(history.message_ttl(), 3600);

        history.development_mode = true;
        assert_eq!(history.message_ttl(), 60);
    }

    #[test]
    fn test_validate_collects_every_problem() {
        let mut config = HistoryConfig::default();
        config.store.database_name = "bad name".to_string();
        config.store.throughput_mode = ThroughputMode::Provisioned;
        config.store.max_throughput = 100;
        config.history.message_ttl_seconds = 0;
        config.search.default_page_size = 500;

        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("database_name"));
        assert!(message.contains("max_throughput"));
        assert!(message.contains("message_ttl_seconds"));
        assert!(message.contains("default_page_size"));
    }

    #[test]
    fn test_tilde_expansion() {
        let store = StoreConfig {
            db_path: "~/history.db".to_string(),
            ..Default::default()
        };
        assert_eq!(store.expanded_db_path(), shellexpand::tilde("~/history.db"));
        assert_eq!(StoreConfig::in_memory().expanded_db_path(), ":memory:");
    }
}
