//! Image Loader: container bytes -> canonical grayscale buffer.

use crate::reading::ErrorKind;
use gabarito_core::PixelBuffer;
use image::{DynamicImage, ImageFormat, ImageReader, Limits};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::{Path, PathBuf};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Where the encoded image comes from.
#[derive(Clone, Copy, Debug)]
pub enum ImageSource<'a> {
    /// Format from the extension, falling back to content sniffing.
    Path(&'a Path),
    /// Format from `format_hint` (`"png"`, `".JPG"`, ...).
    Bytes {
        format_hint: &'a str,
        bytes: &'a [u8],
    },
}

/// Bounds on decoder work.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadParams {
    /// Largest accepted width or height, in pixels.
    pub max_dimension: u32,
    /// Largest allocation the decoder may make, in bytes.
    pub max_alloc_bytes: u64,
}

impl Default for LoadParams {
    fn default() -> Self {
        Self {
            max_dimension: 16_384,
            max_alloc_bytes: 512 * 1024 * 1024,
        }
    }
}

impl LoadParams {
    fn limits(&self) -> Limits {
        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_dimension);
        limits.max_image_height = Some(self.max_dimension);
        limits.max_alloc = Some(self.max_alloc_bytes);
        limits
    }
}

/// Errors produced by [`load`].
#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image source is empty")]
    Empty,
    #[error("unsupported image format `{0}`")]
    UnsupportedFormat(String),
    #[error("image exceeds decode limits: {0}")]
    Limits(#[source] image::ImageError),
    #[error("image decoding failed: {0}")]
    Decode(#[source] image::ImageError),
    #[error(transparent)]
    Buffer(#[from] gabarito_core::ImageError),
}

impl LoadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoadError::Io { .. } | LoadError::Empty => ErrorKind::SourceUnavailable,
            LoadError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            LoadError::Limits(_) | LoadError::Decode(_) | LoadError::Buffer(_) => {
                ErrorKind::DecodeFailure
            }
        }
    }
}

/// Format named by a file extension or a caller hint.
///
/// Case-insensitive; a leading `.` and surrounding whitespace are ignored.
pub fn format_from_hint(hint: &str) -> Option<ImageFormat> {
    let ext = hint.trim().trim_start_matches('.').to_ascii_lowercase();
    if ext.is_empty() {
        return None;
    }
    ImageFormat::from_extension(ext)
}

fn resolve_format(source: &ImageSource<'_>, bytes: &[u8]) -> Result<ImageFormat, LoadError> {
    let format = match source {
        ImageSource::Path(path) => path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(format_from_hint)
            .or_else(|| image::guess_format(bytes).ok())
            .ok_or_else(|| {
                LoadError::UnsupportedFormat(
                    path.extension()
                        .map(|e| e.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "unknown".to_string()),
                )
            })?,
        ImageSource::Bytes { format_hint, .. } => format_from_hint(format_hint)
            .ok_or_else(|| LoadError::UnsupportedFormat(format_hint.to_string()))?,
    };
    if !format.reading_enabled() {
        return Err(LoadError::UnsupportedFormat(format!("{format:?}")));
    }
    Ok(format)
}

fn classify(err: image::ImageError, format: ImageFormat) -> LoadError {
    match err {
        image::ImageError::Limits(_) => LoadError::Limits(err),
        image::ImageError::Unsupported(_) => {
            debug!("{format:?} decoder rejected the input: {err}");
            LoadError::UnsupportedFormat(format!("{format:?}"))
        }
        other => LoadError::Decode(other),
    }
}

/// Luma with alpha composited over white paper.
fn to_gray(img: DynamicImage) -> Result<PixelBuffer, LoadError> {
    let (width, height) = (img.width() as usize, img.height() as usize);
    let data = if img.color().has_alpha() {
        img.to_luma_alpha8()
            .pixels()
            .map(|p| {
                let [l, a] = p.0;
                let (l, a) = (l as u32, a as u32);
                ((l * a + 255 * (255 - a) + 127) / 255) as u8
            })
            .collect()
    } else {
        img.into_luma8().into_raw()
    };
    Ok(PixelBuffer::from_packed(width, height, data)?)
}

/// Decode `bytes` with a known format.
pub fn decode_bytes(
    bytes: &[u8],
    format: ImageFormat,
    params: &LoadParams,
) -> Result<PixelBuffer, LoadError> {
    let mut reader = ImageReader::with_format(Cursor::new(bytes), format);
    reader.limits(params.limits());
    let img = reader.decode().map_err(|e| classify(e, format))?;
    debug!(
        "decoded {format:?} {}x{} ({:?})",
        img.width(),
        img.height(),
        img.color()
    );
    to_gray(img)
}

/// Load an image source into a grayscale [`PixelBuffer`].
///
/// Reads the source and nothing else; no files are written.
#[cfg_attr(feature = "tracing", instrument(level = "info", skip(source, params)))]
pub fn load(source: ImageSource<'_>, params: &LoadParams) -> Result<PixelBuffer, LoadError> {
    let owned;
    let bytes: &[u8] = match source {
        ImageSource::Path(path) => {
            owned = std::fs::read(path).map_err(|source| LoadError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            &owned
        }
        ImageSource::Bytes { bytes, .. } => bytes,
    };
    if bytes.is_empty() {
        return Err(LoadError::Empty);
    }

    let format = resolve_format(&source, bytes)?;
    match decode_bytes(bytes, format, params) {
        // A file whose extension lies about its content gets one more try.
        Err(LoadError::Decode(err)) if matches!(source, ImageSource::Path(_)) => {
            match image::guess_format(bytes) {
                Ok(sniffed) if sniffed != format && sniffed.reading_enabled() => {
                    warn!("{format:?} decode failed ({err}), retrying as {sniffed:?}");
                    decode_bytes(bytes, sniffed, params)
                }
                _ => Err(LoadError::Decode(err)),
            }
        }
        other => other,
    }
}
