//! Audio format conversion.

pub mod ffmpeg;

use crate::error::ConvertError;

pub use ffmpeg::FfmpegConverter;

/// Turns bytes in one audio format into bytes in another.
///
/// Formats are short lowercase tags (`mp3`, `wav`, `flac`, ...). The
/// conversion is treated as opaque and deterministic enough that a
/// failure is terminal for the task that asked for it.
pub trait Converter: Send + Sync {
    fn convert(
        &self,
        input: &[u8],
        source_format: &str,
        target_format: &str,
    ) -> Result<Vec<u8>, ConvertError>;
}

/// Returns true when `tag` looks like a file extension: non-empty,
/// lowercase ASCII letters and digits only.
pub fn is_valid_format_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}
