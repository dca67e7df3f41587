use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::config::MirrorConfig;
use crate::fanout::Substate;
use crate::gateway::events::Event;
use crate::models::{ChannelId, ConversationSummary, Snowflake};

/// Server-generated conversation summaries, held in a bounded in-memory
/// ring per channel and mirrored to disk so they survive restarts.
pub struct State {
    summaries: RwLock<HashMap<ChannelId, Vec<ConversationSummary>>>,
    max_summaries: usize,
    persist: Option<Arc<Persist>>,
    loader_started: std::sync::atomic::AtomicBool,
    loader: Mutex<Option<JoinHandle<()>>>,
    writes: Mutex<Vec<JoinHandle<()>>>,
}

struct Persist {
    /// `<cache-dir>/<app>/summary`
    root: PathBuf,
    max_age: Duration,
    max_count: usize,
    /// Cleanup runs at most once per channel per `max_age`.
    last_clean: Mutex<HashMap<ChannelId, Instant>>,
}

impl State {
    pub fn new(config: &MirrorConfig) -> State {
        let persist = match config.persist_root() {
            Some(root) => Some(Arc::new(Persist {
                root: root.join("summary"),
                max_age: config.persist_max_age,
                max_count: config.persist_max_count,
                last_clean: Mutex::new(HashMap::new()),
            })),
            None => {
                tracing::warn!("no cache directory; summaries will not persist");
                None
            }
        };

        State {
            summaries: RwLock::new(HashMap::new()),
            max_summaries: config.max_summaries,
            persist,
            loader_started: std::sync::atomic::AtomicBool::new(false),
            loader: Mutex::new(None),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Summaries for the channel, ascending by end message.
    pub fn summaries(&self, channel_id: ChannelId) -> Vec<ConversationSummary> {
        self.summaries
            .read()
            .unwrap()
            .get(&channel_id)
            .cloned()
            .unwrap_or_default()
    }

    /// The most recent summary for the channel.
    pub fn last_summary(&self, channel_id: ChannelId) -> Option<ConversationSummary> {
        self.summaries
            .read()
            .unwrap()
            .get(&channel_id)
            .and_then(|list| list.last().cloned())
    }

    fn merge(&self, channel_id: ChannelId, incoming: Vec<ConversationSummary>) {
        let mut map = self.summaries.write().unwrap();
        let list = map.entry(channel_id).or_default();
        for summary in incoming {
            insert_sorted(list, summary, self.max_summaries);
        }
    }

    /// Load everything persisted on a background task and merge it through
    /// the normal insert path. Only the first call does anything.
    pub(crate) fn spawn_loader(self: &Arc<Self>) {
        let Some(persist) = self.persist.clone() else {
            return;
        };
        if self.loader_started.swap(true, std::sync::atomic::Ordering::SeqCst) {
            return;
        }

        let state = self.clone();
        let handle = tokio::spawn(async move {
            let loaded = tokio::task::spawn_blocking(move || persist.load_all()).await;
            match loaded {
                Ok(channels) => {
                    for (channel_id, summaries) in channels {
                        state.merge(channel_id, summaries);
                    }
                }
                Err(err) => tracing::error!(error = %err, "summary loader panicked"),
            }
        });
        *self.loader.lock().unwrap() = Some(handle);
    }

    /// Wait for the startup loader. Shutdown blocks on this so a fast exit
    /// cannot race the merge.
    pub async fn wait_loaded(&self) {
        let handle = self.loader.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Wait for outstanding persistence writes.
    pub async fn flush(&self) {
        let handles: Vec<_> = self.writes.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

impl Substate for State {
    fn prehandle(&self, ev: &mut Event) {
        let Event::ConversationSummaryUpdate(update) = ev else {
            return;
        };

        self.merge(update.channel_id, update.summaries.clone());

        if let Some(persist) = self.persist.clone() {
            let channel_id = update.channel_id;
            let summaries = update.summaries.clone();
            let handle = tokio::task::spawn_blocking(move || {
                persist.write_update(channel_id, &summaries);
            });

            let mut writes = self.writes.lock().unwrap();
            writes.retain(|h| !h.is_finished());
            writes.push(handle);
        }
    }
}

/// Binary-search insert keyed by the end message; an equal key overwrites.
/// The lowest entries are dropped once the list exceeds `max`.
fn insert_sorted(list: &mut Vec<ConversationSummary>, summary: ConversationSummary, max: usize) {
    match list.binary_search_by(|s| s.end_id.cmp(&summary.end_id)) {
        Ok(i) => list[i] = summary,
        Err(i) => list.insert(i, summary),
    }
    if list.len() > max {
        let excess = list.len() - max;
        list.drain(..excess);
    }
}

impl Persist {
    fn channel_dir(&self, channel_id: ChannelId) -> PathBuf {
        self.root.join(channel_id.to_string())
    }

    fn write_update(&self, channel_id: ChannelId, summaries: &[ConversationSummary]) {
        let dir = self.channel_dir(channel_id);
        if let Err(err) = std::fs::create_dir_all(&dir) {
            tracing::error!(error = %err, "failed to create summary directory");
            return;
        }

        for summary in summaries {
            let mut data = match serde_json::to_vec(summary) {
                Ok(data) => data,
                Err(err) => {
                    tracing::error!(error = %err, "failed to marshal summary");
                    continue;
                }
            };
            data.push(b'\n');

            let path = dir.join(format!("{}.json", summary.id));
            if let Err(err) = write_file(&dir, &path, &data) {
                tracing::error!(error = %err, path = %path.display(), "failed to write summary");
            }
        }

        if self.should_clean(channel_id) {
            self.clean_channel(&dir);
        }
    }

    fn should_clean(&self, channel_id: ChannelId) -> bool {
        let mut last_clean = self.last_clean.lock().unwrap();
        if let Some(last) = last_clean.get(&channel_id) {
            if last.elapsed() < self.max_age {
                return false;
            }
        }
        last_clean.insert(channel_id, Instant::now());
        true
    }

    /// Keep the `max_count` most recent summaries that are still younger
    /// than `max_age`; everything else goes, and so does the directory once
    /// it is empty.
    fn clean_channel(&self, dir: &Path) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::error!(error = %err, "failed to read summary directory for cleanup");
                return;
            }
        };

        let mut files: Vec<(Snowflake, PathBuf)> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<Snowflake>().ok());
            match id {
                Some(id) => files.push((id, path)),
                None => tracing::warn!(path = %path.display(), "unparseable summary file name"),
            }
        }
        files.sort_by_key(|(id, _)| *id);

        let max_age = chrono::Duration::from_std(self.max_age).unwrap_or_default();
        let cutoff = chrono::Utc::now() - max_age;

        let mut kept = 0;
        let mut deleted = 0;
        for (id, path) in files.iter().rev() {
            if kept < self.max_count {
                let fresh = id.timestamp().map(|t| t > cutoff).unwrap_or(false);
                if fresh {
                    kept += 1;
                    continue;
                }
            }

            deleted += 1;
            if let Err(err) = std::fs::remove_file(path) {
                tracing::error!(error = %err, "failed to remove stale summary");
            }
        }

        if deleted == files.len() {
            if let Err(err) = std::fs::remove_dir(dir) {
                tracing::error!(error = %err, "failed to remove empty summary directory");
            }
        }
    }

    fn load_all(&self) -> Vec<(ChannelId, Vec<ConversationSummary>)> {
        let channel_dirs = match std::fs::read_dir(&self.root) {
            Ok(dirs) => dirs,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::error!(error = %err, "failed to read summary root");
                }
                return Vec::new();
            }
        };

        let mut loaded = Vec::new();
        for channel_dir in channel_dirs.flatten() {
            let Some(channel_id) = channel_dir
                .file_name()
                .to_str()
                .and_then(|s| s.parse::<Snowflake>().ok())
            else {
                tracing::warn!("unparseable summary channel directory");
                continue;
            };

            let Ok(files) = std::fs::read_dir(channel_dir.path()) else {
                continue;
            };

            let mut summaries = Vec::new();
            for file in files.flatten() {
                match read_summary(&file.path()) {
                    Ok(summary) => summaries.push(summary),
                    Err(err) => {
                        tracing::error!(error = %err, "failed to load persisted summary");
                    }
                }
            }
            if !summaries.is_empty() {
                loaded.push((channel_id, summaries));
            }
        }
        loaded
    }
}

fn read_summary(path: &Path) -> anyhow::Result<ConversationSummary> {
    let data = std::fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

/// Crash-safe write: a sibling tempfile atomically renamed over the target.
/// Windows refuses the rename when the target exists, so it gets a direct
/// overwrite instead.
#[cfg(not(windows))]
fn write_file(dir: &Path, path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut tmp = tempfile::Builder::new().prefix("tmp").tempfile_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(windows)]
fn write_file(_dir: &Path, path: &Path, data: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: u64, end: u64) -> ConversationSummary {
        ConversationSummary {
            id: Snowflake(id),
            end_id: Snowflake(end),
            topic: format!("topic {id}"),
            ..ConversationSummary::default()
        }
    }

    #[test]
    fn insert_keeps_order_and_overwrites_equal_keys() {
        let mut list = Vec::new();
        insert_sorted(&mut list, summary(1, 11), 10);
        insert_sorted(&mut list, summary(2, 13), 10);
        insert_sorted(&mut list, summary(3, 12), 10);
        insert_sorted(&mut list, summary(4, 13), 10);

        let ends: Vec<u64> = list.iter().map(|s| s.end_id.0).collect();
        assert_eq!(ends, vec![11, 12, 13]);
        // The second 13 replaced the first.
        assert_eq!(list[2].id, Snowflake(4));
    }

    #[test]
    fn ring_drops_lowest_when_full() {
        let mut list = Vec::new();
        for i in 1..=12 {
            insert_sorted(&mut list, summary(i, i * 10), 10);
        }
        assert_eq!(list.len(), 10);
        assert_eq!(list[0].end_id, Snowflake(30));
        assert_eq!(list[9].end_id, Snowflake(120));
    }
}
