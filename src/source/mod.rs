//! Where table text comes from: local files, an HTTP server, or memory.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use url::Url;

use crate::config::{Config, SourceKind};
use crate::logging::{log, obj, v_num, v_str, Domain, Level};

pub mod retry;

use retry::{is_retryable_http_error, is_retryable_network_error, retry_async, RetryConfig};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("{location} not found")]
    NotFound { location: String },
    #[error("cannot read {location}: {source}")]
    Io {
        location: String,
        source: std::io::Error,
    },
    #[error("{location} returned HTTP {status}")]
    Status { location: String, status: u16 },
    #[error("request for {location} failed: {source}")]
    Network {
        location: String,
        source: reqwest::Error,
    },
    #[error("invalid location {location}: {reason}")]
    InvalidLocation { location: String, reason: String },
}

impl SourceError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::Status { status, .. } => is_retryable_http_error(*status),
            SourceError::Network { source, .. } => is_retryable_network_error(source),
            _ => false,
        }
    }
}

#[async_trait]
pub trait TableSource: Send + Sync {
    /// Fetch the full text of the table at `location`.
    async fn fetch_text(&self, location: &str) -> Result<String, SourceError>;
}

/// Build the source named by the config.
pub fn from_config(cfg: &Config) -> anyhow::Result<Box<dyn TableSource>> {
    match cfg.source {
        SourceKind::Fs => Ok(Box::new(FsSource::new(&cfg.data_root))),
        SourceKind::Http => Ok(Box::new(HttpSource::new(
            &cfg.base_url,
            Duration::from_secs(cfg.fetch_timeout_secs),
            RetryConfig {
                max_retries: cfg.fetch_retries,
                base_delay_ms: cfg.retry_base_ms,
                ..Default::default()
            },
        )?)),
    }
}

// =============================================================================
// Filesystem
// =============================================================================

/// Tables under a root directory; locations are relative to it.
#[derive(Debug, Clone)]
pub struct FsSource {
    root: PathBuf,
}

impl FsSource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn resolve(&self, location: &str) -> Result<PathBuf, SourceError> {
        let relative = Path::new(location.trim_start_matches('/'));
        if relative.as_os_str().is_empty() {
            return Err(SourceError::InvalidLocation {
                location: location.to_string(),
                reason: "empty path".to_string(),
            });
        }
        if relative.components().any(|c| !matches!(c, Component::Normal(_) | Component::CurDir)) {
            return Err(SourceError::InvalidLocation {
                location: location.to_string(),
                reason: "path escapes the data root".to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl TableSource for FsSource {
    async fn fetch_text(&self, location: &str) -> Result<String, SourceError> {
        let path = self.resolve(location)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(SourceError::NotFound {
                location: location.to_string(),
            }),
            Err(err) => Err(SourceError::Io {
                location: location.to_string(),
                source: err,
            }),
        }
    }
}

// =============================================================================
// HTTP
// =============================================================================

/// Tables served under a base URL, fetched with retry.
pub struct HttpSource {
    client: Client,
    base: Url,
    retry: RetryConfig,
}

impl HttpSource {
    pub fn new(base_url: &str, timeout: Duration, retry: RetryConfig) -> anyhow::Result<Self> {
        let mut base = Url::parse(base_url)?;
        // Url::join drops the last segment unless the base ends with '/'
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            base,
            retry,
        })
    }

    pub fn url_for(&self, location: &str) -> Result<Url, SourceError> {
        self.base
            .join(location.trim_start_matches('/'))
            .map_err(|e| SourceError::InvalidLocation {
                location: location.to_string(),
                reason: e.to_string(),
            })
    }

    async fn fetch_once(&self, url: &Url, location: &str) -> Result<String, SourceError> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| SourceError::Network {
                location: location.to_string(),
                source: e,
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound {
                location: location.to_string(),
            });
        }
        if !status.is_success() {
            return Err(SourceError::Status {
                location: location.to_string(),
                status: status.as_u16(),
            });
        }

        resp.text().await.map_err(|e| SourceError::Network {
            location: location.to_string(),
            source: e,
        })
    }
}

#[async_trait]
impl TableSource for HttpSource {
    async fn fetch_text(&self, location: &str) -> Result<String, SourceError> {
        let url = self.url_for(location)?;
        let text = retry_async(&self.retry, location, SourceError::is_retryable, || {
            self.fetch_once(&url, location)
        })
        .await?;
        log(
            Level::Debug,
            Domain::Source,
            "http_fetched",
            obj(&[("location", v_str(url.as_str())), ("bytes", v_num(text.len() as f64))]),
        );
        Ok(text)
    }
}

// =============================================================================
// Memory
// =============================================================================

/// Tables held in memory, keyed by location.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    tables: HashMap<String, String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, location: impl Into<String>, text: impl Into<String>) -> &mut Self {
        self.tables.insert(location.into(), text.into());
        self
    }

    pub fn with(mut self, location: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(location, text);
        self
    }
}

#[async_trait]
impl TableSource for MemorySource {
    async fn fetch_text(&self, location: &str) -> Result<String, SourceError> {
        self.tables
            .get(location)
            .cloned()
            .ok_or_else(|| SourceError::NotFound {
                location: location.to_string(),
            })
    }
}

#[async_trait]
impl<T: TableSource + ?Sized> TableSource for Box<T> {
    async fn fetch_text(&self, location: &str) -> Result<String, SourceError> {
        (**self).fetch_text(location).await
    }
}

#[async_trait]
impl<T: TableSource + ?Sized> TableSource for std::sync::Arc<T> {
    async fn fetch_text(&self, location: &str) -> Result<String, SourceError> {
        (**self).fetch_text(location).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn fs_resolve_rejects_escapes() {
        let src = FsSource::new("/srv/data");
        assert_eq!(
            src.resolve("/cifar10/deit_epochs.csv").unwrap(),
            PathBuf::from("/srv/data/cifar10/deit_epochs.csv")
        );
        assert!(matches!(
            src.resolve("../secret.csv"),
            Err(SourceError::InvalidLocation { .. })
        ));
        assert!(src.resolve("").is_err());
    }

    #[tokio::test]
    async fn fs_missing_file_is_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let src = FsSource::new(dir.path());
        let err = src.fetch_text("nope.csv").await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn fs_reads_file() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("cifar10")).unwrap();
        std::fs::write(dir.path().join("cifar10/a.csv"), "x,y\n1,2\n").unwrap();
        let src = FsSource::new(dir.path());
        assert_eq!(src.fetch_text("cifar10/a.csv").await.unwrap(), "x,y\n1,2\n");
    }

    #[tokio::test]
    async fn memory_source_lookup() {
        let src = MemorySource::new().with("a.csv", "h\n1");
        assert_eq!(src.fetch_text("a.csv").await.unwrap(), "h\n1");
        assert!(src.fetch_text("b.csv").await.is_err());
    }

    #[test]
    fn http_urls_join_under_base_path() {
        let src = HttpSource::new("http://localhost:3000/data", Duration::from_secs(1), RetryConfig::none())
            .unwrap();
        assert_eq!(
            src.url_for("/cifar10/resnet18_epochs.csv").unwrap().as_str(),
            "http://localhost:3000/data/cifar10/resnet18_epochs.csv"
        );
    }

    /// Serve `responses` in order, one per connection, counting requests.
    async fn canned_server(responses: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                counter.fetch_add(1, Ordering::SeqCst);
                let reply = format!(
                    "HTTP/1.1 {} X\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(reply.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        (format!("http://{}/data", addr), hits)
    }

    fn quick_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay_ms: 1,
            jitter_factor: 0.0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn http_returns_body_on_success() {
        let (base, hits) = canned_server(vec![(200, "Class,Recall\ncat,0.9\n")]).await;
        let src = HttpSource::new(&base, Duration::from_secs(5), quick_retry(2)).unwrap();
        let text = src.fetch_text("cifar10/deit_classes.csv").await.unwrap();
        assert_eq!(text, "Class,Recall\ncat,0.9\n");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn http_404_is_not_found_without_retry() {
        let (base, hits) = canned_server(vec![(404, ""), (200, "late")]).await;
        let src = HttpSource::new(&base, Duration::from_secs(5), quick_retry(2)).unwrap();
        let err = src.fetch_text("missing.csv").await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound { .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn http_permanent_status_is_reported_without_retry() {
        let (base, hits) = canned_server(vec![(403, "no"), (200, "late")]).await;
        let src = HttpSource::new(&base, Duration::from_secs(5), quick_retry(2)).unwrap();
        let err = src.fetch_text("a.csv").await.unwrap_err();
        assert!(matches!(err, SourceError::Status { status: 403, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn http_transient_status_is_retried() {
        let (base, hits) = canned_server(vec![(503, "busy"), (200, "Epoch\n1\n")]).await;
        let src = HttpSource::new(&base, Duration::from_secs(5), quick_retry(2)).unwrap();
        let text = src.fetch_text("a.csv").await.unwrap();
        assert_eq!(text, "Epoch\n1\n");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn http_gives_up_after_max_retries() {
        let (base, hits) = canned_server(vec![(503, ""), (503, ""), (503, "")]).await;
        let src = HttpSource::new(&base, Duration::from_secs(5), quick_retry(1)).unwrap();
        let err = src.fetch_text("a.csv").await.unwrap_err();
        assert!(matches!(err, SourceError::Status { status: 503, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn status_errors_retry_only_when_transient() {
        let busy = SourceError::Status { location: "a".into(), status: 503 };
        let gone = SourceError::Status { location: "a".into(), status: 410 };
        assert!(busy.is_retryable());
        assert!(!gone.is_retryable());
    }
}
