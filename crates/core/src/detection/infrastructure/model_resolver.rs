use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("failed to create cache directory: {0}")]
    CacheDir(#[source] std::io::Error),
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write model to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not determine cache directory")]
    NoCacheDir,
    #[error("model {0} not found and no download URL configured")]
    NotFound(String),
}

/// Progress callback: `(bytes_downloaded, total_bytes)`.
/// `total_bytes` is 0 if the server didn't provide Content-Length.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send>;

/// Resolve a model file, checking local locations before downloading.
///
/// Resolution order:
/// 1. `explicit` path, when it exists
/// 2. User cache directory (platform-specific), as `name`
/// 3. Bundled directory, as `name`
/// 4. Download from `url` into the cache
pub fn resolve(
    explicit: Option<&Path>,
    name: &str,
    url: Option<&str>,
    bundled_dir: Option<&Path>,
    progress: Option<ProgressFn>,
) -> Result<PathBuf, ModelResolveError> {
    resolve_in(explicit, &model_cache_dir()?, name, url, bundled_dir, progress)
}

fn resolve_in(
    explicit: Option<&Path>,
    cache_dir: &Path,
    name: &str,
    url: Option<&str>,
    bundled_dir: Option<&Path>,
    progress: Option<ProgressFn>,
) -> Result<PathBuf, ModelResolveError> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        log::warn!(
            "Configured model {} does not exist, falling back to cache",
            path.display()
        );
    }

    let cached_path = cache_dir.join(name);
    if cached_path.is_file() {
        return Ok(cached_path);
    }

    if let Some(dir) = bundled_dir {
        let bundled_path = dir.join(name);
        if bundled_path.is_file() {
            return Ok(bundled_path);
        }
    }

    let url = url.ok_or_else(|| ModelResolveError::NotFound(name.to_string()))?;
    fs::create_dir_all(cache_dir).map_err(ModelResolveError::CacheDir)?;
    log::info!("Downloading {name} from {url}");
    download(url, &cached_path, progress)?;
    Ok(cached_path)
}

/// Platform-specific model cache directory.
///
/// - macOS: `~/Library/Application Support/PCB Inspect/models/`
/// - Linux: `$XDG_CACHE_HOME/PCB Inspect/models/` or `~/.cache/PCB Inspect/models/`
/// - Windows: `%LOCALAPPDATA%/PCB Inspect/models/`
pub fn model_cache_dir() -> Result<PathBuf, ModelResolveError> {
    #[cfg(target_os = "macos")]
    {
        dirs::data_dir()
            .map(|d| d.join(APP_DIR).join("models"))
            .ok_or(ModelResolveError::NoCacheDir)
    }
    #[cfg(not(target_os = "macos"))]
    {
        dirs::cache_dir()
            .map(|d| d.join(APP_DIR).join("models"))
            .ok_or(ModelResolveError::NoCacheDir)
    }
}

const APP_DIR: &str = "PCB Inspect";

/// Fetches `url` into a hidden temp file beside `dest`, then renames it into
/// place. Nothing is left behind when the transfer fails.
fn download(url: &str, dest: &Path, progress: Option<ProgressFn>) -> Result<(), ModelResolveError> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|source| ModelResolveError::Download {
            url: url.to_string(),
            source,
        })?;
    let total = response.content_length().unwrap_or(0);

    let mut staged = tempfile::Builder::new()
        .prefix(".model-")
        .suffix(".part")
        .tempfile_in(dir)
        .map_err(write_err(dir))?;

    let mut body = CountingReader {
        inner: response,
        seen: 0,
        total,
        progress,
    };
    io::copy(&mut body, staged.as_file_mut()).map_err(write_err(staged.path()))?;
    staged.as_file_mut().flush().map_err(write_err(staged.path()))?;

    staged
        .persist(dest)
        .map_err(|e| write_err(dest)(e.error))?;
    Ok(())
}

fn write_err(path: &Path) -> impl FnOnce(io::Error) -> ModelResolveError {
    let path = path.to_path_buf();
    move |source| ModelResolveError::Write { path, source }
}

/// Reports cumulative bytes to the progress callback as they are read.
struct CountingReader<R> {
    inner: R,
    seen: u64,
    total: u64,
    progress: Option<ProgressFn>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.seen += n as u64;
            if let Some(cb) = &self.progress {
                cb(self.seen, self.total);
            }
        }
        Ok(n)
    }
}
