//! Immutable handles to source media.
//!
//! A [`MediaInput`] is what the file-intake side hands to the extractor:
//! the raw bytes (or a path to them), their size, and the declared MIME
//! type. The size drives [`CapturePolicy`](crate::CapturePolicy); nothing
//! here is ever mutated after construction.

use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::error::SnapError;

const BYTES_PER_MEGABYTE: f64 = 1024.0 * 1024.0;

/// Where the bytes of a [`MediaInput`] live.
#[derive(Clone)]
pub enum MediaSource {
    /// Bytes held in memory, shared cheaply between clones.
    Memory(Arc<[u8]>),
    /// A file on disk, read by the decoder in place.
    File(PathBuf),
}

/// Immutable handle to a source video.
///
/// # Example
///
/// ```
/// use snapframe::MediaInput;
///
/// let input = MediaInput::from_bytes(vec![0_u8; 2048], "video/mp4");
/// assert_eq!(input.size(), 2048);
/// assert!(input.is_video());
/// ```
#[derive(Clone)]
pub struct MediaInput {
    source: MediaSource,
    size: u64,
    mime_type: String,
    name: Option<String>,
}

impl Debug for MediaInput {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let source = match &self.source {
            MediaSource::Memory(_) => "memory".to_string(),
            MediaSource::File(path) => path.display().to_string(),
        };
        f.debug_struct("MediaInput")
            .field("source", &source)
            .field("size", &self.size)
            .field("mime_type", &self.mime_type)
            .field("name", &self.name)
            .finish()
    }
}

impl MediaInput {
    /// Wrap an in-memory buffer with its declared MIME type.
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>, mime_type: impl Into<String>) -> Self {
        let bytes: Arc<[u8]> = bytes.into();
        Self {
            size: bytes.len() as u64,
            source: MediaSource::Memory(bytes),
            mime_type: mime_type.into(),
            name: None,
        }
    }

    /// Reference a file on disk without reading it.
    ///
    /// The size comes from filesystem metadata and the MIME type is guessed
    /// from the extension.
    ///
    /// # Errors
    ///
    /// Returns [`SnapError::FileOpen`] if the file's metadata cannot be read.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SnapError> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path).map_err(|error| SnapError::FileOpen {
            path: path.to_path_buf(),
            reason: error.to_string(),
        })?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        Ok(Self {
            source: MediaSource::File(path.to_path_buf()),
            size: metadata.len(),
            mime_type: guess_mime_type(path).to_string(),
            name,
        })
    }

    /// Override the declared MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    /// Attach a display name (usually the original file name).
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Byte length of the input.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Size in (binary) megabytes, fractional.
    pub fn size_in_megabytes(&self) -> f64 {
        megabytes(self.size)
    }

    /// Declared MIME type.
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Display name, if one was given or derived from the path.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether the declared MIME type is a video type.
    pub fn is_video(&self) -> bool {
        self.mime_type.starts_with("video/")
    }

    /// Where the bytes live.
    pub fn source(&self) -> &MediaSource {
        &self.source
    }

    /// File extension hint for temporary spills.
    ///
    /// Known MIME types map to their usual extension; otherwise the display
    /// name's extension is used, so FFmpeg can still detect the format by suffix.
    pub(crate) fn extension_hint(&self) -> String {
        let known = match self.mime_type.as_str() {
            "video/mp4" => Some(".mp4"),
            "video/quicktime" => Some(".mov"),
            "video/webm" => Some(".webm"),
            "video/x-matroska" => Some(".mkv"),
            "video/x-msvideo" => Some(".avi"),
            "video/mpeg" => Some(".mpg"),
            _ => None,
        };
        if let Some(extension) = known {
            return extension.to_string();
        }
        self.name
            .as_deref()
            .and_then(|name| Path::new(name).extension())
            .map(|extension| format!(".{}", extension.to_string_lossy()))
            .unwrap_or_default()
    }
}

/// Binary megabytes in `bytes`.
pub(crate) fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MEGABYTE
}

fn guess_mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "mpg" | "mpeg" => "video/mpeg",
        _ => "application/octet-stream",
    }
}
