//! On-disk cache of recipe photos
//!
//! Each recipe id maps to one file, `<id>.<ext>`, where the extension comes
//! from the format detected in the downloaded bytes. Presence on disk is the
//! only state: there is no expiry and no metadata file.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use directories::ProjectDirs;
use futures::future::{BoxFuture, FutureExt, Shared};
use image::ImageFormat;
use reqwest::{Client, Url};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Formats we are willing to persist, in lookup order
const SUPPORTED_FORMATS: [ImageFormat; 4] = [
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::Gif,
    ImageFormat::WebP,
];

/// Extension of partially written files, renamed into place when complete
const TEMP_EXTENSION: &str = "part";

/// Largest image body we accept, 10 MiB
pub const MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

/// Errors that can occur while populating or purging the image cache
#[derive(Debug, Error)]
pub enum CacheError {
    /// The image request failed before a response arrived
    #[error("Failed to download image for {id}: {source}")]
    Download {
        id: String,
        #[source]
        source: reqwest::Error,
    },

    /// The image server answered with a non-success status
    #[error("Image download for {id} returned HTTP status {status}")]
    DownloadStatus { id: String, status: u16 },

    /// The image body is larger than the configured limit
    #[error("Image for {id} exceeds the {limit} byte limit")]
    TooLarge { id: String, limit: u64 },

    /// The download task ended without producing a result
    #[error("Image download for {id} stopped before finishing")]
    Interrupted { id: String },

    /// The downloaded bytes are not an image format we store
    #[error("Downloaded data for {id} is not a supported image format")]
    UnrecognizedFormat { id: String },

    /// Persisting the image to disk failed
    #[error("Failed to write image for {id}: {source}")]
    Write {
        id: String,
        #[source]
        source: io::Error,
    },

    /// Listing or deleting cache files failed
    #[error("Failed to purge image cache: {0}")]
    Purge(#[source] io::Error),
}

/// What a call to [`ImageCache::ensure`] ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// No usable URL was given, nothing to do
    NoImage,
    /// A local copy already existed
    AlreadyCached,
    /// The image was downloaded and stored in the given format
    Downloaded(ImageFormat),
}

/// Result shared by every caller waiting on the same download
pub type EnsureResult = Result<EnsureOutcome, Arc<CacheError>>;

type InFlight = Shared<BoxFuture<'static, EnsureResult>>;

/// A running download and the ticket of the task that owns the slot
struct Slot {
    ticket: u64,
    download: InFlight,
}

type InFlightMap = Arc<Mutex<HashMap<String, Slot>>>;

/// A cached image read back from disk
#[derive(Debug, Clone)]
pub struct CachedImage {
    /// Recipe id the image belongs to
    pub id: String,
    /// Location of the file
    pub path: PathBuf,
    /// Format recorded in the file extension
    pub format: ImageFormat,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Raw encoded bytes as downloaded
    pub bytes: Vec<u8>,
}

/// Downloads recipe photos once and serves them from disk afterwards
///
/// Concurrent [`ensure`](Self::ensure) calls for the same id share a single
/// in-flight download. Writes land via temp file and rename, so readers
/// only ever see complete files. [`purge_all`](Self::purge_all) waits for
/// running downloads to finish before deleting anything.
///
/// Downloads run on their own tokio task, so a caller that stops waiting
/// does not stop the download or hold up a purge.
pub struct ImageCache {
    /// HTTP client used for image downloads
    http_client: Client,
    /// Directory holding one file per recipe id
    cache_dir: PathBuf,
    /// Downloads currently running, keyed by recipe id
    in_flight: InFlightMap,
    /// Source of slot tickets
    next_ticket: AtomicU64,
    /// Downloads hold read, purge holds write
    gate: Arc<RwLock<()>>,
    /// Responses larger than this are refused
    max_image_bytes: u64,
}

impl fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageCache")
            .field("cache_dir", &self.cache_dir)
            .finish_non_exhaustive()
    }
}

impl ImageCache {
    /// Creates an ImageCache in the XDG cache directory
    ///
    /// Uses `~/.cache/recipes/images/` on Linux, or the platform equivalent.
    /// Returns `None` if the cache directory cannot be determined.
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "recipes")?;
        Some(Self::with_dir(project_dirs.cache_dir().join("images")))
    }

    /// Creates an ImageCache rooted at a custom directory
    pub fn with_dir(cache_dir: PathBuf) -> Self {
        Self {
            http_client: Client::new(),
            cache_dir,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_ticket: AtomicU64::new(0),
            gate: Arc::new(RwLock::new(())),
            max_image_bytes: MAX_IMAGE_BYTES,
        }
    }

    /// Replaces the HTTP client used for downloads
    pub fn with_client(mut self, client: Client) -> Self {
        self.http_client = client;
        self
    }

    /// Sets the largest image body accepted from the server
    pub fn with_max_image_bytes(mut self, limit: u64) -> Self {
        self.max_image_bytes = limit;
        self
    }

    /// Returns the cache directory
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns true if a file exists for `id`
    pub fn contains(&self, id: &str) -> bool {
        find_entry(&self.cache_dir, id).is_some()
    }

    /// Makes sure a local copy of the image for `id` exists
    ///
    /// An absent or unparseable URL, or a blank id, is logged and treated as
    /// nothing to do. If a file for `id` is already present no request is
    /// made. Otherwise the image is downloaded, its format detected and the
    /// bytes stored. Callers arriving while a download for the same id is
    /// running await that download and receive its result.
    pub async fn ensure(&self, id: &str, url: Option<&str>) -> EnsureResult {
        if id.trim().is_empty() {
            warn!("Blank image id, skipping");
            return Ok(EnsureOutcome::NoImage);
        }

        let url = match url {
            None => {
                debug!(id = %id, "No image URL, skipping");
                return Ok(EnsureOutcome::NoImage);
            }
            Some(raw) => match Url::parse(raw) {
                Ok(url) => url,
                Err(e) => {
                    warn!(id = %id, url = %raw, error = %e, "Invalid image URL, skipping");
                    return Ok(EnsureOutcome::NoImage);
                }
            },
        };

        let download = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = in_flight.get(id) {
                slot.download.clone()
            } else {
                let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
                let download = self.spawn_download(id, url, ticket);
                in_flight.insert(
                    id.to_string(),
                    Slot {
                        ticket,
                        download: download.clone(),
                    },
                );
                download
            }
        };

        download.await
    }

    /// Starts the download task for `id`
    ///
    /// Must be called with the in-flight map locked, so the task cannot
    /// release its slot before the slot exists.
    fn spawn_download(&self, id: &str, url: Url, ticket: u64) -> InFlight {
        let job = DownloadJob {
            http_client: self.http_client.clone(),
            cache_dir: self.cache_dir.clone(),
            id: id.to_string(),
            url,
            gate: Arc::clone(&self.gate),
            max_image_bytes: self.max_image_bytes,
            _slot: SlotRelease {
                in_flight: Arc::clone(&self.in_flight),
                id: id.to_string(),
                ticket,
            },
        };
        let handle = tokio::spawn(job.run());

        let id = id.to_string();
        async move {
            handle.await.unwrap_or_else(|e| {
                warn!(id = %id, error = %e, "Image download task failed");
                Err(Arc::new(CacheError::Interrupted { id }))
            })
        }
        .boxed()
        .shared()
    }

    /// Reads back the cached image for `id`
    ///
    /// Returns `None` when nothing is cached or the file does not decode.
    pub fn retrieve(&self, id: &str) -> Option<CachedImage> {
        let Some((path, format)) = find_entry(&self.cache_dir, id) else {
            debug!(id = %id, "Image not cached");
            return None;
        };

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(id = %id, path = %path.display(), error = %e, "Failed to read cached image");
                return None;
            }
        };

        match image::load_from_memory_with_format(&bytes, format) {
            Ok(decoded) => Some(CachedImage {
                id: id.to_string(),
                path,
                format,
                width: decoded.width(),
                height: decoded.height(),
                bytes,
            }),
            Err(e) => {
                warn!(id = %id, path = %path.display(), error = %e, "Cached image failed to decode");
                None
            }
        }
    }

    /// Deletes every cached image
    ///
    /// Returns the number of files removed. A cache directory that was never
    /// created counts as already empty; files we did not write are left alone.
    pub async fn purge_all(&self) -> Result<usize, CacheError> {
        let _guard = self.gate.write().await;

        let mut entries = match tokio::fs::read_dir(&self.cache_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(CacheError::Purge(e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await.map_err(CacheError::Purge)? {
            let path = entry.path();
            if !is_cache_file(&path) {
                continue;
            }
            tokio::fs::remove_file(&path)
                .await
                .map_err(CacheError::Purge)?;
            debug!(path = %path.display(), "Deleted cached image");
            removed += 1;
        }

        info!(removed, dir = %self.cache_dir.display(), "Purged image cache");
        Ok(removed)
    }
}

/// Removes the in-flight slot when the download task ends, however it ends
struct SlotRelease {
    in_flight: InFlightMap,
    id: String,
    ticket: u64,
}

impl Drop for SlotRelease {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight
            .get(&self.id)
            .is_some_and(|slot| slot.ticket == self.ticket)
        {
            in_flight.remove(&self.id);
        }
    }
}

/// Everything one download needs, owned so it can run on its own task
struct DownloadJob {
    http_client: Client,
    cache_dir: PathBuf,
    id: String,
    url: Url,
    gate: Arc<RwLock<()>>,
    max_image_bytes: u64,
    _slot: SlotRelease,
}

impl DownloadJob {
    async fn run(self) -> EnsureResult {
        let _guard = Arc::clone(&self.gate).read_owned().await;

        if entry_exists(&self.cache_dir, &self.id).await {
            debug!(id = %self.id, "Image already cached, skipping download");
            return Ok(EnsureOutcome::AlreadyCached);
        }

        debug!(id = %self.id, url = %self.url, "Downloading image");
        let bytes = self.download().await.map_err(Arc::new)?;

        let format = detect_format(&bytes).ok_or_else(|| {
            Arc::new(CacheError::UnrecognizedFormat {
                id: self.id.clone(),
            })
        })?;

        let path = entry_path(&self.cache_dir, &self.id, format);
        write_atomic(&self.cache_dir, &path, &bytes)
            .await
            .map_err(|source| {
                Arc::new(CacheError::Write {
                    id: self.id.clone(),
                    source,
                })
            })?;

        info!(id = %self.id, kind = ?format, size = bytes.len(), "Cached image");
        Ok(EnsureOutcome::Downloaded(format))
    }

    async fn download(&self) -> Result<Vec<u8>, CacheError> {
        let mut response = self
            .http_client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|source| CacheError::Download {
                id: self.id.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CacheError::DownloadStatus {
                id: self.id.clone(),
                status: status.as_u16(),
            });
        }

        let too_large = || CacheError::TooLarge {
            id: self.id.clone(),
            limit: self.max_image_bytes,
        };
        if response
            .content_length()
            .is_some_and(|length| length > self.max_image_bytes)
        {
            return Err(too_large());
        }

        // Content-Length may be missing or wrong, so the limit is also
        // enforced while reading.
        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|source| CacheError::Download {
                id: self.id.clone(),
                source,
            })?
        {
            if (bytes.len() + chunk.len()) as u64 > self.max_image_bytes {
                return Err(too_large());
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(bytes)
    }
}

/// Writes to a temp file then renames it over `path`
async fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;

    let temp_path = path.with_extension(TEMP_EXTENSION);
    if let Err(e) = tokio::fs::write(&temp_path, bytes).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }
    tokio::fs::rename(&temp_path, path).await
}

/// Detects the image format from content, limited to the formats we store
fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes)
        .ok()
        .filter(|format| SUPPORTED_FORMATS.contains(format))
}

/// File extension used for a stored format
fn extension(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "jpg",
        ImageFormat::Png => "png",
        ImageFormat::Gif => "gif",
        ImageFormat::WebP => "webp",
        _ => "img",
    }
}

fn entry_path(cache_dir: &Path, id: &str, format: ImageFormat) -> PathBuf {
    cache_dir.join(format!("{}.{}", sanitize_id(id), extension(format)))
}

/// Async form of [`find_entry`] for use inside download tasks
async fn entry_exists(cache_dir: &Path, id: &str) -> bool {
    for format in SUPPORTED_FORMATS {
        let path = entry_path(cache_dir, id, format);
        if tokio::fs::metadata(&path)
            .await
            .is_ok_and(|meta| meta.is_file())
        {
            return true;
        }
    }
    false
}

/// Finds the stored file for `id`, whatever format it was saved in
fn find_entry(cache_dir: &Path, id: &str) -> Option<(PathBuf, ImageFormat)> {
    SUPPORTED_FORMATS.iter().find_map(|&format| {
        let path = entry_path(cache_dir, id, format);
        path.is_file().then_some((path, format))
    })
}

/// True for files this cache writes: stored images and leftover temp files
///
/// Matches on the text after the last dot, so a name like `.jpg` counts too.
fn is_cache_file(path: &Path) -> bool {
    let Some((_, ext)) = path
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.rsplit_once('.'))
    else {
        return false;
    };
    ext == TEMP_EXTENSION
        || SUPPORTED_FORMATS
            .iter()
            .any(|&format| extension(format) == ext)
}

/// Replaces characters that are unsafe in file names with underscores
fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}
