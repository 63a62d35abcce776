use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Fs,
    Http,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub source: SourceKind,
    /// Root directory for `SourceKind::Fs`
    pub data_root: PathBuf,
    /// Base URL for `SourceKind::Http`
    pub base_url: String,
    pub default_dataset: String,
    /// Optional JSON file replacing the built-in registry
    pub registry_path: Option<PathBuf>,
    pub fetch_timeout_secs: u64,
    pub fetch_retries: u32,
    pub retry_base_ms: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value lookup; absent or unparseable values take defaults.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            source: match var("METRICS_SOURCE").unwrap_or_default().to_lowercase().as_str() {
                "http" | "https" => SourceKind::Http,
                _ => SourceKind::Fs,
            },
            data_root: var("METRICS_ROOT").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("data")),
            base_url: var("METRICS_BASE_URL").unwrap_or_else(|| "http://localhost:3000/".to_string()),
            default_dataset: var("DEFAULT_DATASET").unwrap_or_else(|| crate::registry::DEFAULT_DATASET.to_string()),
            registry_path: var("REGISTRY_PATH").filter(|v| !v.is_empty()).map(PathBuf::from),
            fetch_timeout_secs: var("FETCH_TIMEOUT_SECS").and_then(|v| v.parse().ok()).unwrap_or(10),
            fetch_retries: var("FETCH_RETRIES").and_then(|v| v.parse().ok()).unwrap_or(2),
            retry_base_ms: var("FETCH_RETRY_BASE_MS").and_then(|v| v.parse().ok()).unwrap_or(100),
        }
    }
}
