//! Key/value track format records exchanged with codecs, readers and muxers.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Well-known format keys.
pub mod keys {
    /// MIME type of the track, e.g. `video/avc`.
    pub const MIME: &str = "mime";
    /// Target bit rate in bits per second (i32).
    pub const BIT_RATE: &str = "bitrate";
    /// Key frame interval in seconds (f32).
    pub const I_FRAME_INTERVAL: &str = "i-frame-interval";
    /// Encoder color format (i32).
    pub const COLOR_FORMAT: &str = "color-format";
    /// Rotation in degrees (i32).
    pub const ROTATION: &str = "rotation-degrees";
    /// Codec throughput goal in frames per second (f32 or i32).
    pub const OPERATING_RATE: &str = "operating-rate";
    /// Codec priority hint (i32).
    pub const PRIORITY: &str = "priority";
    /// When 0, the decoder must not drop frames its consumer has not read.
    pub const ALLOW_FRAME_DROP: &str = "allow-frame-drop";
    /// Sample aspect ratio numerator/denominator (i32).
    pub const SAR_WIDTH: &str = "sar-width";
    pub const SAR_HEIGHT: &str = "sar-height";
    /// Display aspect geometry (i32).
    pub const DISPLAY_WIDTH: &str = "display-width";
    pub const DISPLAY_HEIGHT: &str = "display-height";
    /// Track duration in microseconds (i64).
    pub const DURATION: &str = "durationUs";
    pub const WIDTH: &str = "width";
    pub const HEIGHT: &str = "height";
}

/// A single typed format entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormatValue {
    Int32(i32),
    Int64(i64),
    Float(f32),
    Str(String),
}

impl Display for FormatValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatValue::Int32(v) => write!(f, "{}", v),
            FormatValue::Int64(v) => write!(f, "{}", v),
            FormatValue::Float(v) => write!(f, "{}", v),
            FormatValue::Str(v) => write!(f, "{}", v),
        }
    }
}

/// An ordered key/value record describing a media track.
///
/// Formats travel between the sample reader, the codecs and the sample sink.
/// Values are typed; getters return `None` on both a missing key and a type
/// mismatch, matching how codecs probe for optional entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaFormat {
    entries: BTreeMap<String, FormatValue>,
}

impl MediaFormat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&FormatValue> {
        self.entries.get(key)
    }

    pub fn set(&mut self, key: &str, value: FormatValue) {
        self.entries.insert(key.to_owned(), value);
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        match self.entries.get(key) {
            Some(FormatValue::Int32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.entries.get(key) {
            Some(FormatValue::Int64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_f32(&self, key: &str) -> Option<f32> {
        match self.entries.get(key) {
            Some(FormatValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(FormatValue::Str(v)) => Some(v),
            _ => None,
        }
    }

    pub fn set_i32(&mut self, key: &str, value: i32) {
        self.set(key, FormatValue::Int32(value));
    }

    pub fn set_i64(&mut self, key: &str, value: i64) {
        self.set(key, FormatValue::Int64(value));
    }

    pub fn set_f32(&mut self, key: &str, value: f32) {
        self.set(key, FormatValue::Float(value));
    }

    pub fn set_str(&mut self, key: &str, value: impl Into<String>) {
        self.set(key, FormatValue::Str(value.into()));
    }

    /// MIME type of the track, if present.
    pub fn mime(&self) -> Option<&str> {
        self.get_str(keys::MIME)
    }

    /// Copy `key` from `src` into this format, whatever its value type.
    /// Missing entries are left untouched.
    pub fn copy_entry(&mut self, src: &MediaFormat, key: &str) {
        if let Some(value) = src.get(key) {
            self.set(key, value.clone());
        }
    }
}

impl Display for MediaFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (key, value) in &self.entries {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", key, value)?;
            first = false;
        }
        Ok(())
    }
}
