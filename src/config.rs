use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime knobs for the mirror. Every field has a sensible default; the
/// embedder can override through the environment or by mutating the struct
/// before constructing the mirror.
#[derive(Clone, Debug)]
pub struct MirrorConfig {
    /// Application name, used as the cache subdirectory.
    pub app_name: String,

    /// Override for the persistence root. Defaults to the user cache dir.
    pub cache_dir: Option<PathBuf>,

    // Summaries
    pub max_summaries: usize,
    pub persist_max_age: Duration,
    pub persist_max_count: usize,

    // Member lists
    /// Number of non-initial subscription windows kept alive per channel.
    pub max_active_windows: usize,
    /// Minimum gap between member search commands per guild.
    pub search_frequency: Duration,
    pub search_limit: u32,
    /// Whether member requests also ask for presences.
    pub request_presences: bool,
    /// Coalescing delay for batched individual member requests.
    pub batch_delay: Duration,

    /// How long `open` waits for the first ready event.
    pub open_timeout: Duration,

    /// Capacity of the application-facing event channel.
    pub event_capacity: usize,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            app_name: "tidemark".into(),
            cache_dir: None,
            max_summaries: 10,
            persist_max_age: Duration::from_secs(30 * 60),
            persist_max_count: 50,
            max_active_windows: 2,
            search_frequency: Duration::from_millis(600),
            search_limit: 50,
            request_presences: true,
            batch_delay: Duration::from_millis(500),
            open_timeout: Duration::from_secs(60),
            event_capacity: 256,
        }
    }
}

impl MirrorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            app_name: env::var("TIDEMARK_APP_NAME").unwrap_or(defaults.app_name),
            cache_dir: env::var("TIDEMARK_CACHE_DIR").ok().map(PathBuf::from),
            max_summaries: env_usize("TIDEMARK_MAX_SUMMARIES", defaults.max_summaries),
            persist_max_age: env_secs("TIDEMARK_PERSIST_MAX_AGE_SECS", defaults.persist_max_age),
            persist_max_count: env_usize("TIDEMARK_PERSIST_MAX_COUNT", defaults.persist_max_count),
            max_active_windows: env_usize("TIDEMARK_MAX_ACTIVE_WINDOWS", defaults.max_active_windows),
            search_frequency: env_millis("TIDEMARK_SEARCH_FREQ_MS", defaults.search_frequency),
            search_limit: env_u32("TIDEMARK_SEARCH_LIMIT", defaults.search_limit),
            request_presences: env::var("TIDEMARK_REQUEST_PRESENCES")
                .map(|v| v != "0" && v != "false")
                .unwrap_or(defaults.request_presences),
            batch_delay: env_millis("TIDEMARK_BATCH_DELAY_MS", defaults.batch_delay),
            open_timeout: env_secs("TIDEMARK_OPEN_TIMEOUT_SECS", defaults.open_timeout),
            event_capacity: env_usize("TIDEMARK_EVENT_CAPACITY", defaults.event_capacity),
        }
    }

    /// Root directory for persisted state: `<cache-dir>/<app-name>`.
    pub fn persist_root(&self) -> Option<PathBuf> {
        let base = match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => dirs::cache_dir()?,
        };
        Some(base.join(&self.app_name))
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
