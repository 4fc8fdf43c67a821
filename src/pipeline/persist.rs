//! Append-only BMP writer and the file naming scheme.
//!
//! Names look like
//! `<prefix>cam<camera>_<tag>_<YYYYmmdd>_<HHMMSS>_<subsec>_fn<position>_tn<cycle>.bmp`.
//! The timestamp is UTC by default so names sort lexicographically in
//! capture order, including across daylight-saving changes. `(fn, tn)`
//! identifies the counter, so two frames of one camera never share a name.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use image::codecs::bmp::BmpEncoder;
use image::{ExtendedColorType, ImageEncoder};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capture::frame::DecodedFrame;
use crate::error::PersistError;

const STAMP: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    pub prefix: String,
    /// Deployment tag after the camera token, e.g. `trig` or `type`.
    pub tag: String,
    /// Sub-second digits kept in the timestamp, 1..=6.
    pub subsecond_digits: u8,
    /// Stamp names in UTC; `false` uses local wall time, which repeats an
    /// hour when daylight saving ends.
    pub utc: bool,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            tag: "trig".into(),
            subsecond_digits: 6,
            utc: true,
        }
    }
}

impl NamingConfig {
    pub fn file_name(&self, frame: &DecodedFrame) -> String {
        let micros = frame.captured_at.timestamp_subsec_micros().min(999_999);
        let digits = usize::from(self.subsecond_digits.clamp(1, 6));
        let subsec = format!("{micros:06}");
        let stamp = if self.utc {
            frame.captured_at.with_timezone(&Utc).format(STAMP).to_string()
        } else {
            frame.captured_at.format(STAMP).to_string()
        };
        format!(
            "{}cam{}_{}_{}_{}_fn{}_tn{}.bmp",
            self.prefix,
            frame.tag.camera,
            self.tag,
            stamp,
            &subsec[..digits],
            frame.tag.position,
            frame.tag.trigger_cycle,
        )
    }
}

/// Fields recovered from a file name produced by `NamingConfig`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub prefix: String,
    pub camera: u32,
    pub tag: String,
    /// `YYYYmmdd_HHMMSS_<subsec>`
    pub timestamp: String,
    pub position: u32,
    pub trigger_cycle: u64,
}

pub fn parse_file_name(name: &str) -> Option<ParsedName> {
    let stem = name.strip_suffix(".bmp")?;
    let mut parts = stem.rsplitn(7, '_');

    let trigger_cycle = parts.next()?.strip_prefix("tn")?.parse().ok()?;
    let position = parts.next()?.strip_prefix("fn")?.parse().ok()?;
    let subsec = parts.next()?;
    let time = parts.next()?;
    let date = parts.next()?;
    let tag = parts.next()?;
    let head = parts.next()?;

    let all_digits = |s: &str, len: Option<usize>| {
        !s.is_empty()
            && s.bytes().all(|b| b.is_ascii_digit())
            && len.map_or(true, |n| s.len() == n)
    };
    if !all_digits(date, Some(8)) || !all_digits(time, Some(6)) || !all_digits(subsec, None) {
        return None;
    }

    let cam_at = head.rfind("cam")?;
    let camera = head[cam_at + 3..].parse().ok()?;

    Some(ParsedName {
        prefix: head[..cam_at].to_string(),
        camera,
        tag: tag.to_string(),
        timestamp: format!("{date}_{time}_{subsec}"),
        position,
        trigger_cycle,
    })
}

/// Writes decoded frames as uncompressed 24-bit BMP files.
#[derive(Debug, Clone)]
pub struct PersistenceSink {
    dir: PathBuf,
    naming: NamingConfig,
}

impl PersistenceSink {
    pub fn new(dir: impl Into<PathBuf>, naming: NamingConfig) -> Self {
        Self {
            dir: dir.into(),
            naming,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save into the configured directory.
    pub fn save(&self, frame: &DecodedFrame) -> Result<PathBuf, PersistError> {
        self.save_to(frame, &self.dir)
    }

    /// Save into `dir`, creating it if needed. Existing files are never
    /// replaced.
    pub fn save_to(&self, frame: &DecodedFrame, dir: &Path) -> Result<PathBuf, PersistError> {
        let started = Instant::now();
        fs::create_dir_all(dir).map_err(|source| PersistError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let path = dir.join(self.naming.file_name(frame));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| match source.kind() {
                ErrorKind::AlreadyExists => PersistError::AlreadyExists(path.clone()),
                _ => PersistError::Io {
                    path: path.clone(),
                    source,
                },
            })?;

        if let Err(err) = write_bmp(file, frame, &path) {
            let _ = fs::remove_file(&path);
            return Err(err);
        }

        let elapsed = started.elapsed();
        metrics::histogram!("frame_save_time_us").record(elapsed.as_micros() as f64);
        debug!("Saved {} in {:?}", path.display(), elapsed);
        Ok(path)
    }
}

fn write_bmp(file: fs::File, frame: &DecodedFrame, path: &Path) -> Result<(), PersistError> {
    let mut writer = BufWriter::new(file);
    let image = &frame.image;
    BmpEncoder::new(&mut writer)
        .write_image(&image.data, image.width, image.height, ExtendedColorType::Rgb8)
        .map_err(|source| PersistError::Encode {
            path: path.to_path_buf(),
            source,
        })?;
    writer.flush().map_err(|source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    })
}
