#[cfg(feature = "http")]
mod http_loader;

use crate::cache::CacheEntry;
use crate::error::{BoardError, BoardResult};
use futures_util::future::{join_all, LocalBoxFuture};
use image::{DynamicImage, ImageReader};
use log::{error, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};
use std::io::Cursor;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "http")]
pub use crate::loader::http_loader::{HttpImageSource, HttpSourceOptions};

/// A decoded raster ready to hand to the render surface.
#[derive(Clone)]
pub struct RasterHandle {
    image: Arc<DynamicImage>,
}

impl RasterHandle {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }
}

impl PartialEq for RasterHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.image, &other.image)
    }
}

impl Debug for RasterHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "RasterHandle({}x{})", self.width(), self.height())
    }
}

pub fn decode_raster(data: &[u8]) -> anyhow::Result<RasterHandle> {
    let img = ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .decode()?;
    Ok(RasterHandle::new(img))
}

/// Resolves a source path into a decoded raster.
pub trait ImageSource {
    /// Address `path` is fetched from. May differ between calls.
    fn url(&self, path: &str) -> String {
        path.to_string()
    }

    fn load(&self, url: &str) -> LocalBoxFuture<'static, anyhow::Result<RasterHandle>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure.
    pub retries: u32,
    pub delay_ms: u64,
}

impl RetryPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            delay_ms: 1000,
        }
    }
}

pub async fn load_with_retry(
    source: Rc<dyn ImageSource>,
    path: String,
    policy: RetryPolicy,
) -> BoardResult<CacheEntry> {
    let mut attempt = 0;
    loop {
        let url = source.url(&path);
        match source.load(&url).await {
            Ok(handle) => return Ok(CacheEntry { handle, url }),
            Err(err) if attempt < policy.retries => {
                attempt += 1;
                warn!(
                    "failed to load {} ({:#}), retry {}/{}",
                    path, err, attempt, policy.retries
                );
                tokio::time::sleep(policy.delay()).await;
            }
            Err(err) => {
                error!("giving up on {} after {} attempts: {:#}", path, attempt + 1, err);
                return Err(err.into());
            }
        }
    }
}

/// Fetches every distinct path concurrently and waits for all of them,
/// whatever their outcome.
pub async fn fetch_all(
    source: Rc<dyn ImageSource>,
    paths: Vec<String>,
    policy: RetryPolicy,
) -> HashMap<String, BoardResult<CacheEntry>> {
    let tasks = paths.into_iter().map(|path| {
        let source = source.clone();
        async move {
            let result = load_with_retry(source, path.clone(), policy).await;
            (path, result)
        }
    });
    join_all(tasks).await.into_iter().collect()
}

/// Validated, non-blank source paths in host order.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceList {
    paths: Vec<String>,
}

impl SourceList {
    pub fn from_paths<S: AsRef<str>>(paths: &[S]) -> BoardResult<Self> {
        let mut valid = Vec::with_capacity(paths.len());
        for (index, path) in paths.iter().enumerate() {
            let path = path.as_ref().trim();
            if path.is_empty() {
                warn!("skipping blank image path at {}", index);
            } else {
                valid.push(path.to_string());
            }
        }
        if valid.is_empty() {
            return Err(BoardError::NoValidImages);
        }
        Ok(Self { paths: valid })
    }

    /// Accepts the raw list the host hands over.
    pub fn from_value(value: &Value) -> BoardResult<Self> {
        let Some(items) = value.as_array() else {
            warn!("image list is not an array: {}", value);
            return Err(BoardError::NoValidImages);
        };
        let mut paths = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            match item.as_str() {
                Some(s) => paths.push(s),
                None => warn!("skipping non-string image path at {}: {}", index, item),
            }
        }
        Self::from_paths(&paths)
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha1::new();
        for path in &self.paths {
            hasher.update(path.as_bytes());
            hasher.update(b"\n");
        }
        base16ct::lower::encode_string(&hasher.finalize())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum LoadStatus {
    Idle,
    Loading { total: usize },
    NoValidImages,
    Loaded { loaded: usize, total: usize },
    Failed { total: usize },
}

impl Display for LoadStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadStatus::Idle => f.write_str("idle"),
            LoadStatus::Loading { total } => write!(f, "loading {} images", total),
            LoadStatus::NoValidImages => f.write_str("no valid images"),
            LoadStatus::Loaded { loaded, total } => write!(f, "loaded {}/{}", loaded, total),
            LoadStatus::Failed { total } => write!(f, "failed to load {} images", total),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum LoadOutcome {
    /// Same paths as the last completed cycle; nothing was fetched.
    Skipped,
    /// The board was torn down while fetching; results were discarded.
    Superseded,
    Loaded { loaded: usize, total: usize },
}

/// One slot of a finished cycle, in source order.
#[derive(Clone, Debug)]
pub struct Settled {
    pub index: usize,
    /// `None` once every attempt failed.
    pub handle: Option<RasterHandle>,
}

#[cfg(test)]
mod tests {
    use crate::error::BoardError;
    use crate::loader::{decode_raster, load_with_retry, ImageSource, RasterHandle, RetryPolicy, SourceList};
    use anyhow::anyhow;
    use futures_util::future::{FutureExt, LocalBoxFuture};
    use image::{DynamicImage, ImageFormat, RgbaImage};
    use serde_json::json;
    use std::cell::Cell;
    use std::io::Cursor;
    use std::rc::Rc;
    use std::time::Duration;

    struct Flaky {
        failures: u32,
        calls: Cell<u32>,
    }

    impl ImageSource for Flaky {
        fn load(&self, _url: &str) -> LocalBoxFuture<'static, anyhow::Result<RasterHandle>> {
            let call = self.calls.get();
            self.calls.set(call + 1);
            let fail = call < self.failures;
            async move {
                if fail {
                    Err(anyhow!("decode error"))
                } else {
                    Ok(RasterHandle::new(DynamicImage::new_luma8(4, 3)))
                }
            }
            .boxed_local()
        }
    }

    #[test]
    fn test_source_list_filters_blanks() {
        let list = SourceList::from_value(&json!(["a.png", "", 3, "  ", "b.png"])).unwrap();
        assert_eq!(vec!["a.png".to_string(), "b.png".to_string()], list.paths());
        assert_eq!(Err(BoardError::NoValidImages), SourceList::from_value(&json!(["", " "])));
        assert_eq!(Err(BoardError::NoValidImages), SourceList::from_value(&json!("a.png")));
        assert_eq!(Err(BoardError::NoValidImages), SourceList::from_paths::<&str>(&[]));
    }

    #[test]
    fn test_fingerprint_tracks_content_and_order() {
        let ab = SourceList::from_paths(&["a.png", "b.png"]).unwrap();
        let ab2 = SourceList::from_paths(&["a.png", " b.png "]).unwrap();
        let ba = SourceList::from_paths(&["b.png", "a.png"]).unwrap();
        assert_eq!(ab.fingerprint(), ab2.fingerprint());
        assert_ne!(ab.fingerprint(), ba.fingerprint());
        assert_eq!(40, ab.fingerprint().len());
    }

    #[test]
    fn test_decode_raster() {
        let mut data = Vec::new();
        RgbaImage::new(5, 7)
            .write_to(&mut Cursor::new(&mut data), ImageFormat::Png)
            .unwrap();
        let handle = decode_raster(&data).unwrap();
        assert_eq!((5, 7), (handle.width(), handle.height()));
        assert!(decode_raster(b"not an image").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers() {
        let source = Rc::new(Flaky { failures: 2, calls: Cell::new(0) });
        let started = tokio::time::Instant::now();
        let entry = load_with_retry(source.clone(), "a.png".to_string(), RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(4, entry.handle.width());
        assert_eq!("a.png", entry.url);
        assert_eq!(3, source.calls.get());
        assert_eq!(Duration::from_secs(2), started.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted() {
        let source = Rc::new(Flaky { failures: u32::MAX, calls: Cell::new(0) });
        let result = load_with_retry(source.clone(), "a.png".to_string(), RetryPolicy::default()).await;
        assert!(matches!(result, Err(BoardError::Fetch(_))));
        assert_eq!(4, source.calls.get());
    }
}
