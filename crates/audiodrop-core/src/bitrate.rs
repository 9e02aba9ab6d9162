// Target bitrate for MP3 encoding
//
// Bitrates arrive as free-form form fields. Only `<digits>k` within the
// MPEG-1 Layer III range is accepted, so the value can be handed to the
// transcoder as a single argument without being interpreted as a flag.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BitrateError;

/// Lowest MPEG-1 Layer III bitrate (kbps).
pub const MIN_KBPS: u32 = 32;

/// Highest MPEG-1 Layer III bitrate (kbps).
pub const MAX_KBPS: u32 = 320;

/// Bitrate used when the client does not send one.
pub const DEFAULT_KBPS: u32 = 192;

/// Longest digit run accepted before parsing, guards against overflow.
const MAX_DIGITS: usize = 4;

/// A validated audio bitrate such as `192k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Bitrate(u32);

impl Bitrate {
    pub fn from_kbps(kbps: u32) -> Result<Self, BitrateError> {
        if !(MIN_KBPS..=MAX_KBPS).contains(&kbps) {
            return Err(BitrateError::OutOfRange {
                kbps,
                min: MIN_KBPS,
                max: MAX_KBPS,
            });
        }
        Ok(Self(kbps))
    }

    /// Parses an optional form value; missing or blank means the default.
    pub fn parse_or_default(value: Option<&str>) -> Result<Self, BitrateError> {
        match value.map(str::trim) {
            None | Some("") => Ok(Self::default()),
            Some(s) => s.parse(),
        }
    }

    pub fn kbps(&self) -> u32 {
        self.0
    }

    /// The argument form passed to the encoder, e.g. `128k`.
    pub fn as_arg(&self) -> String {
        format!("{}k", self.0)
    }
}

impl Default for Bitrate {
    fn default() -> Self {
        Self(DEFAULT_KBPS)
    }
}

impl FromStr for Bitrate {
    type Err = BitrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_suffix('k')
            .filter(|d| {
                !d.is_empty() && d.len() <= MAX_DIGITS && d.bytes().all(|b| b.is_ascii_digit())
            })
            .ok_or_else(|| BitrateError::Format(s.to_string()))?;

        let kbps: u32 = digits
            .parse()
            .map_err(|_| BitrateError::Format(s.to_string()))?;

        Self::from_kbps(kbps)
    }
}

impl TryFrom<String> for Bitrate {
    type Error = BitrateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Bitrate> for String {
    fn from(value: Bitrate) -> Self {
        value.as_arg()
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}k", self.0)
    }
}
