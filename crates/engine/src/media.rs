//! Image preprocessing before upload.
//!
//! Small JPEG and PNG payloads pass through untouched. Anything larger, or
//! of another type, is decoded, capped to a maximum side length and
//! re-encoded as JPEG at decreasing quality until it fits the upload limit.
//! Every failure returns the original bytes.

use gemline_config::MediaConfig;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageResult, Rgb, RgbImage};
use tracing::debug;

/// Mime type assumed when the platform does not report one.
pub const DEFAULT_MIME: &str = "image/jpeg";

/// Types the backend accepts without re-encoding.
const PASSTHROUGH_MIME: [&str; 2] = ["image/jpeg", "image/png"];

/// Qualities tried in order when re-encoding.
const JPEG_QUALITIES: [u8; 5] = [85, 80, 75, 70, 65];

/// Limits applied by [`downscale`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownscaleOptions {
    pub max_bytes: usize,
    pub max_side: u32,
}

impl Default for DownscaleOptions {
    fn default() -> Self {
        Self::from_config(&MediaConfig::default())
    }
}

impl DownscaleOptions {
    pub fn from_config(config: &MediaConfig) -> Self {
        Self {
            max_bytes: config.max_upload_bytes,
            max_side: config.max_side,
        }
    }
}

/// Normalize a reported content type, defaulting to [`DEFAULT_MIME`].
pub fn effective_mime(mime_type: &str) -> &str {
    let trimmed = mime_type.trim();
    if trimmed.is_empty() {
        DEFAULT_MIME
    } else {
        trimmed
    }
}

/// Whether `bytes` can be uploaded as-is.
pub fn is_passthrough(bytes: &[u8], mime_type: &str, opts: &DownscaleOptions) -> bool {
    let mime = effective_mime(mime_type);
    bytes.len() <= opts.max_bytes
        && PASSTHROUGH_MIME
            .iter()
            .any(|accepted| accepted.eq_ignore_ascii_case(mime))
}

/// Shrink an image to fit the upload limits.
///
/// Returns the (possibly unchanged) bytes and their mime type. When no
/// quality step fits the byte limit the quality-65 attempt is returned.
pub fn downscale(bytes: Vec<u8>, mime_type: &str, opts: &DownscaleOptions) -> (Vec<u8>, String) {
    let mime = effective_mime(mime_type).to_string();
    if is_passthrough(&bytes, &mime, opts) {
        return (bytes, mime);
    }

    match reencode(&bytes, opts) {
        Ok(encoded) => {
            debug!(
                original_bytes = bytes.len(),
                encoded_bytes = encoded.len(),
                original_mime = %mime,
                "Re-encoded image for upload"
            );
            (encoded, DEFAULT_MIME.to_string())
        }
        Err(e) => {
            debug!(error = %e, mime = %mime, "Image re-encode failed, sending original");
            (bytes, mime)
        }
    }
}

fn reencode(bytes: &[u8], opts: &DownscaleOptions) -> ImageResult<Vec<u8>> {
    let decoded = image::load_from_memory(bytes)?;
    let capped = cap_side(decoded, opts.max_side);
    let rgb = flatten(&capped);

    let mut last = Vec::new();
    for quality in JPEG_QUALITIES {
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, quality).encode_image(&rgb)?;
        if buf.len() <= opts.max_bytes {
            return Ok(buf);
        }
        last = buf;
    }
    Ok(last)
}

/// Scale so the longer side is at most `max_side`; never upscales.
fn cap_side(img: DynamicImage, max_side: u32) -> DynamicImage {
    let (w, h) = (img.width(), img.height());
    let longer = w.max(h);
    if longer <= max_side || longer == 0 {
        return img;
    }
    let scale = f64::from(max_side) / f64::from(longer);
    let nw = ((f64::from(w) * scale) as u32).max(1);
    let nh = ((f64::from(h) * scale) as u32).max(1);
    img.resize_exact(nw, nh, FilterType::Lanczos3)
}

/// JPEG has no alpha channel; composite transparent pixels onto white.
fn flatten(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = u16::from(a);
        let blend = |c: u8| ((u16::from(c) * alpha + 255 * (255 - alpha)) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}
