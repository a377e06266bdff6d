use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::ConvertError;

use super::{is_valid_format_tag, Converter};

/// Converts audio by shelling out to an `ffmpeg` binary.
///
/// Input and output go through temporary files because several
/// containers (m4a in particular) cannot be written to a pipe.
pub struct FfmpegConverter {
    binary: PathBuf,
}

impl FfmpegConverter {
    pub fn new<P: Into<PathBuf>>(binary: P) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

impl Default for FfmpegConverter {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

/// Encoder arguments for the output side of an ffmpeg invocation.
/// Unknown targets let ffmpeg pick from the output extension.
fn codec_args(target_format: &str) -> &'static [&'static str] {
    match target_format {
        "wav" => &["-acodec", "pcm_s16le", "-ar", "44100"],
        "mp3" => &["-acodec", "libmp3lame", "-q:a", "2"],
        "m4a" => &["-acodec", "aac"],
        "flac" => &["-acodec", "flac"],
        _ => &[],
    }
}

fn io_error(context: &str) -> impl FnOnce(std::io::Error) -> ConvertError + '_ {
    move |source| ConvertError::Io {
        context: context.to_string(),
        source,
    }
}

impl Converter for FfmpegConverter {
    fn convert(
        &self,
        input: &[u8],
        source_format: &str,
        target_format: &str,
    ) -> Result<Vec<u8>, ConvertError> {
        for tag in [source_format, target_format] {
            if !is_valid_format_tag(tag) {
                return Err(ConvertError::UnsupportedFormat(tag.to_string()));
            }
        }

        let workdir = tempfile::tempdir().map_err(io_error("create work directory"))?;
        let input_path = workdir.path().join(format!("input.{}", source_format));
        let output_path = workdir.path().join(format!("output.{}", target_format));

        let mut input_file =
            std::fs::File::create(&input_path).map_err(io_error("create input file"))?;
        input_file
            .write_all(input)
            .map_err(io_error("write input file"))?;
        drop(input_file);

        let output = Command::new(&self.binary)
            .args(["-hide_banner", "-loglevel", "error", "-nostdin", "-y", "-i"])
            .arg(&input_path)
            .args(codec_args(target_format))
            .arg(&output_path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ConvertError::Spawn {
                binary: self.binary.clone(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(ConvertError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let converted = std::fs::read(&output_path).map_err(io_error("read output file"))?;
        log::debug!(
            "Converted {} bytes of {} into {} bytes of {}",
            input.len(),
            source_format,
            converted.len(),
            target_format
        );
        Ok(converted)
    }
}
