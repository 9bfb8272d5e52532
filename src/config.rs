use std::thread;

pub const DEFAULT_INDEX_TOKEN: &str = "_studytree";
pub const DEFAULT_COPY_SUFFIX: &str = "_copy";
pub const DEFAULT_MERGE_SUFFIX: &str = "_merged";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Substring identifying the index file inside a session folder.
    pub index_token: String,
    pub scan_workers: usize,
    pub copy_suffix: String,
    pub merge_suffix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index_token: DEFAULT_INDEX_TOKEN.to_string(),
            scan_workers: default_scan_workers(),
            copy_suffix: DEFAULT_COPY_SUFFIX.to_string(),
            merge_suffix: DEFAULT_MERGE_SUFFIX.to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            index_token: non_empty(lookup("STUDYTREE_INDEX_TOKEN"))
                .unwrap_or(defaults.index_token),
            scan_workers: lookup("STUDYTREE_SCAN_WORKERS")
                .and_then(|raw| raw.trim().parse::<usize>().ok())
                .filter(|value| *value > 0)
                .map_or(defaults.scan_workers, |value| value.clamp(1, 32)),
            copy_suffix: non_empty(lookup("STUDYTREE_COPY_SUFFIX"))
                .unwrap_or(defaults.copy_suffix),
            merge_suffix: non_empty(lookup("STUDYTREE_MERGE_SUFFIX"))
                .unwrap_or(defaults.merge_suffix),
        }
    }

    /// Workers for a scan of `file_count` files; never more than the files.
    pub fn workers_for(&self, file_count: usize) -> usize {
        self.scan_workers.clamp(1, 32).min(file_count.max(1))
    }
}

fn default_scan_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .clamp(1, 4)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}
