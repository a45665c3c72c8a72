//! Media relocation: move attachments from transient, credential-gated
//! transport URLs into durable, publicly fetchable storage.
//!
//! Fan-out must never hand a recipient a URL that can expire or that needs
//! credentials they do not have, so every attachment is relocated before any
//! send happens.  The relocator is the sole writer of attachment state
//! transitions; a failed relocation never aborts the broadcast — the message
//! goes out with a placeholder for that one attachment.
//!
//! Transient fetch/store failures are retried under an explicit
//! [`RetryPolicy`]; validation failures (size, content type) are permanent
//! and fail immediately.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::rlog;

#[derive(Debug)]
pub enum MediaError {
    TooLarge { size: u64, limit: u64 },
    UnsupportedType(String),
    Fetch(String),
    Store(String),
}

impl std::fmt::Display for MediaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaError::TooLarge { size, limit } => {
                write!(f, "media too large: {size} bytes (limit {limit})")
            }
            MediaError::UnsupportedType(ct) => write!(f, "unsupported media type: {ct}"),
            MediaError::Fetch(msg) => write!(f, "media fetch failed: {msg}"),
            MediaError::Store(msg) => write!(f, "media store failed: {msg}"),
        }
    }
}

impl std::error::Error for MediaError {}

impl MediaError {
    /// Fetch/store failures may be transient network weather and are worth
    /// retrying; validation failures are permanent.
    pub fn is_transient(&self) -> bool {
        matches!(self, MediaError::Fetch(_) | MediaError::Store(_))
    }
}

/// Raw bytes pulled from the transient source.
pub struct FetchedMedia {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Fetches one media object from its transient source URL.
pub trait MediaFetch: Send + Sync {
    fn fetch(&self, source_url: &str) -> Result<FetchedMedia, MediaError>;
}

/// Durable storage that republishes bytes under a stable public URL.
pub trait MediaStore: Send + Sync {
    fn store(&self, key: &str, content_type: &str, bytes: &[u8]) -> Result<String, MediaError>;
}

/// Bounded retry with a fixed backoff schedule.
///
/// `backoff[0]` is slept before the second attempt, `backoff[1]` before the
/// third, and so on; a schedule shorter than `max_attempts - 1` repeats its
/// last entry.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: vec![Duration::from_millis(250), Duration::from_secs(1)],
        }
    }
}

impl RetryPolicy {
    /// Delay to sleep before the given attempt (1-based). None for the first.
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        if attempt <= 1 || self.backoff.is_empty() {
            return None;
        }
        let index = ((attempt - 2) as usize).min(self.backoff.len() - 1);
        Some(self.backoff[index])
    }
}

/// Content-type and size limits enforced before storing.
#[derive(Debug, Clone)]
pub struct MediaLimits {
    pub max_bytes: u64,
    /// Accepted content-type prefixes, e.g. `image/`.
    pub allowed_prefixes: Vec<String>,
}

impl Default for MediaLimits {
    fn default() -> Self {
        Self {
            max_bytes: 5 * 1024 * 1024,
            allowed_prefixes: vec![
                "image/".to_string(),
                "video/".to_string(),
                "audio/".to_string(),
            ],
        }
    }
}

impl MediaLimits {
    fn check(&self, media: &FetchedMedia) -> Result<(), MediaError> {
        if !self
            .allowed_prefixes
            .iter()
            .any(|p| media.content_type.starts_with(p.as_str()))
        {
            return Err(MediaError::UnsupportedType(media.content_type.clone()));
        }
        let size = media.bytes.len() as u64;
        if size > self.max_bytes {
            return Err(MediaError::TooLarge {
                size,
                limit: self.max_bytes,
            });
        }
        Ok(())
    }
}

/// Successful relocation result.
#[derive(Debug, Clone)]
pub struct RelocatedMedia {
    pub public_url: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub attempts: u32,
}

/// Terminal relocation failure, with the attempt count for bookkeeping.
#[derive(Debug)]
pub struct RelocationFailure {
    pub error: MediaError,
    pub attempts: u32,
}

/// Coordinates fetch, validation and store for one attachment.
pub struct MediaRelocator {
    fetcher: Arc<dyn MediaFetch>,
    store: Arc<dyn MediaStore>,
    limits: MediaLimits,
    retry: RetryPolicy,
}

impl MediaRelocator {
    pub fn new(
        fetcher: Arc<dyn MediaFetch>,
        store: Arc<dyn MediaStore>,
        limits: MediaLimits,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            fetcher,
            store,
            limits,
            retry,
        }
    }

    /// Relocate one attachment, retrying transient failures up to the policy
    /// budget.  Blocking; call from `spawn_blocking` in async context.
    pub fn relocate(
        &self,
        message_id: i64,
        position: u32,
        source_url: &str,
    ) -> Result<RelocatedMedia, RelocationFailure> {
        let key = object_key(message_id, position, source_url);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if let Some(delay) = self.retry.delay_before(attempt) {
                std::thread::sleep(delay);
            }
            match self.try_once(&key, source_url) {
                Ok(mut relocated) => {
                    relocated.attempts = attempt;
                    rlog!(
                        "media: relocated {} attachment {} ({} bytes, {} attempt(s))",
                        crate::logging::msg_id(message_id),
                        position,
                        relocated.size_bytes,
                        attempt
                    );
                    return Ok(relocated);
                }
                Err(error) if error.is_transient() && attempt < self.retry.max_attempts => {
                    rlog!(
                        "media: attempt {}/{} for {} attachment {} failed: {}",
                        attempt,
                        self.retry.max_attempts,
                        crate::logging::msg_id(message_id),
                        position,
                        error
                    );
                }
                Err(error) => {
                    rlog!(
                        "media: giving up on {} attachment {} after {} attempt(s): {}",
                        crate::logging::msg_id(message_id),
                        position,
                        attempt,
                        error
                    );
                    return Err(RelocationFailure { error, attempts: attempt });
                }
            }
        }
    }

    fn try_once(&self, key: &str, source_url: &str) -> Result<RelocatedMedia, MediaError> {
        let media = self.fetcher.fetch(source_url)?;
        self.limits.check(&media)?;
        let public_url = self.store.store(key, &media.content_type, &media.bytes)?;
        Ok(RelocatedMedia {
            public_url,
            content_type: media.content_type,
            size_bytes: media.bytes.len() as u64,
            attempts: 0,
        })
    }
}

/// Collision-resistant storage key derived from message id, attachment index
/// and source URL.
fn object_key(message_id: i64, position: u32, source_url: &str) -> String {
    let digest = Sha256::digest(format!("{message_id}/{position}/{source_url}").as_bytes());
    hex::encode(digest)
}

// ---------------------------------------------------------------------------
// ureq-backed fetcher
// ---------------------------------------------------------------------------

/// Per-attempt deadline for a media fetch. The retry policy bounds attempt
/// count; this bounds attempt duration, so a stalled source can never wedge
/// a relocation.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetches media from the transport's authenticated media endpoint using
/// HTTP basic auth.
pub struct UreqFetcher {
    agent: ureq::Agent,
    username: String,
    password: String,
    /// Hard read cap, one byte above the limit so oversize objects are
    /// detected without buffering them whole.
    read_limit: u64,
}

impl UreqFetcher {
    pub fn new(username: String, password: String, max_bytes: u64) -> Self {
        Self::with_timeout(username, password, max_bytes, FETCH_TIMEOUT)
    }

    pub fn with_timeout(
        username: String,
        password: String,
        max_bytes: u64,
        timeout: Duration,
    ) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout(timeout)
            .build();
        Self {
            agent,
            username,
            password,
            read_limit: max_bytes + 1,
        }
    }
}

impl MediaFetch for UreqFetcher {
    fn fetch(&self, source_url: &str) -> Result<FetchedMedia, MediaError> {
        let auth = BASE64.encode(format!("{}:{}", self.username, self.password));
        let response = self
            .agent
            .get(source_url)
            .set("Authorization", &format!("Basic {auth}"))
            .call()
            .map_err(|e| match e {
                ureq::Error::Status(code, _) => MediaError::Fetch(format!("http status {code}")),
                other => MediaError::Fetch(other.to_string()),
            })?;

        let content_type = response.content_type().to_string();
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(self.read_limit)
            .read_to_end(&mut bytes)
            .map_err(|e| MediaError::Fetch(e.to_string()))?;
        Ok(FetchedMedia {
            bytes,
            content_type,
        })
    }
}

// ---------------------------------------------------------------------------
// Filesystem-backed durable store
// ---------------------------------------------------------------------------

/// Durable store writing under a docroot served at a public base URL.
///
/// Keys get a two-level directory prefix (`key[0..2]/key[2..4]`) to avoid
/// large flat directories, and an extension derived from the content type.
pub struct FsMediaStore {
    root: PathBuf,
    public_base_url: String,
}

impl FsMediaStore {
    pub fn new(root: PathBuf, public_base_url: String) -> Self {
        let public_base_url = public_base_url.trim_end_matches('/').to_string();
        Self {
            root,
            public_base_url,
        }
    }

    fn relative_path(key: &str, content_type: &str) -> String {
        let ext = content_type_to_ext(content_type);
        let (d1, d2) = if key.len() >= 4 {
            (&key[..2], &key[2..4])
        } else {
            (key, "xx")
        };
        format!("{d1}/{d2}/{key}.{ext}")
    }
}

impl MediaStore for FsMediaStore {
    fn store(&self, key: &str, content_type: &str, bytes: &[u8]) -> Result<String, MediaError> {
        let relative = Self::relative_path(key, content_type);
        let path = self.root.join(&relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MediaError::Store(e.to_string()))?;
        }
        std::fs::write(&path, bytes).map_err(|e| MediaError::Store(e.to_string()))?;
        Ok(format!("{}/{relative}", self.public_base_url))
    }
}

fn content_type_to_ext(content_type: &str) -> &'static str {
    match content_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "video/mp4" => "mp4",
        "video/3gpp" => "3gp",
        "audio/mpeg" => "mp3",
        "audio/ogg" => "ogg",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_repeats_last_entry() {
        let policy = RetryPolicy {
            max_attempts: 4,
            backoff: vec![Duration::from_millis(10), Duration::from_millis(20)],
        };
        assert_eq!(policy.delay_before(1), None);
        assert_eq!(policy.delay_before(2), Some(Duration::from_millis(10)));
        assert_eq!(policy.delay_before(3), Some(Duration::from_millis(20)));
        assert_eq!(policy.delay_before(4), Some(Duration::from_millis(20)));
    }

    #[test]
    fn object_keys_differ_per_position() {
        let a = object_key(1, 0, "https://example.com/a");
        let b = object_key(1, 1, "https://example.com/a");
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn limits_reject_oversize_and_foreign_types() {
        let limits = MediaLimits {
            max_bytes: 4,
            allowed_prefixes: vec!["image/".to_string()],
        };
        let too_big = FetchedMedia {
            bytes: vec![0u8; 5],
            content_type: "image/png".to_string(),
        };
        assert!(matches!(
            limits.check(&too_big),
            Err(MediaError::TooLarge { .. })
        ));
        let wrong_type = FetchedMedia {
            bytes: vec![0u8; 2],
            content_type: "application/zip".to_string(),
        };
        assert!(matches!(
            limits.check(&wrong_type),
            Err(MediaError::UnsupportedType(_))
        ));
    }
}
