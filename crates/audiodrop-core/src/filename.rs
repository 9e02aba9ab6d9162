// Filename sanitization and stored-name parsing
//
// Stored files are named `{artifact_id}_{display}` where `display` is always
// the output of secure_filename. Parsing a stored name re-checks both halves,
// so a name that parses can be joined onto the storage directory as-is.

use std::fmt;

use crate::error::NameError;
use crate::id::ArtifactId;

/// Maximum length in bytes of a sanitized display name.
pub const MAX_DISPLAY_LEN: usize = 200;

/// Extensions longer than this are treated as part of the stem when truncating.
const MAX_EXTENSION_LEN: usize = 16;

/// Extension given to every converted artifact.
pub const OUTPUT_EXTENSION: &str = "mp3";

/// Reduces a client-supplied filename to a safe, flat, ASCII name.
///
/// Rules:
/// 1. Keep only the last path component (`/` and `\` are both separators)
/// 2. Drop non-ASCII and control characters
/// 3. Collapse whitespace runs into a single `_`
/// 4. Drop anything outside `[A-Za-z0-9._-]`
/// 5. Trim leading and trailing `.` and `_`
/// 6. Truncate to MAX_DISPLAY_LEN, keeping the extension
///
/// Returns None when nothing usable is left.
pub fn secure_filename(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next().unwrap_or("");

    let mut out = String::with_capacity(last.len());
    let mut pending_space = false;
    for c in last.chars() {
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')) {
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push('_');
        }
        pending_space = false;
        out.push(c);
    }

    let trimmed = truncate_keeping_extension(trim_name(&out));
    let trimmed = trim_name(&trimmed);
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn trim_name(s: &str) -> &str {
    s.trim_matches(|c| c == '.' || c == '_')
}

fn truncate_keeping_extension(s: &str) -> String {
    if s.len() <= MAX_DISPLAY_LEN {
        return s.to_string();
    }

    // Only ASCII survives sanitization, so byte offsets are char boundaries.
    match s.rsplit_once('.') {
        Some((stem, ext)) if !ext.is_empty() && ext.len() <= MAX_EXTENSION_LEN => {
            let keep = MAX_DISPLAY_LEN - ext.len() - 1;
            format!("{}.{}", &stem[..keep.min(stem.len())], ext)
        }
        _ => s[..MAX_DISPLAY_LEN].to_string(),
    }
}

/// Returns the lowercased extension (text after the last `.`), if any.
pub fn extension(name: &str) -> Option<String> {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext.to_ascii_lowercase()),
        _ => None,
    }
}

/// Checks the extension case-insensitively against an allow-list.
pub fn has_allowed_extension<S: AsRef<str>>(name: &str, allowed: &[S]) -> bool {
    match extension(name) {
        Some(ext) => allowed.iter().any(|a| a.as_ref().eq_ignore_ascii_case(&ext)),
        None => false,
    }
}

/// Derives the converted file's display name: the input stem plus `.mp3`.
pub fn output_name(sanitized_input: &str) -> String {
    let stem = match sanitized_input.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => sanitized_input,
    };
    truncate_keeping_extension(&format!("{}.{}", stem, OUTPUT_EXTENSION))
}

/// A validated `{artifact_id}_{display}` storage name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoredName {
    id: ArtifactId,
    display: String,
}

impl StoredName {
    /// Builds a stored name from a freshly allocated id and a display name
    /// that has already been through secure_filename.
    pub fn new(id: ArtifactId, display: impl Into<String>) -> Self {
        Self {
            id,
            display: display.into(),
        }
    }

    /// Parses a client-supplied stored name.
    ///
    /// The prefix must be a canonical artifact id and the remainder must be
    /// non-empty and already sanitized. Nothing here touches the filesystem.
    pub fn parse(requested: &str) -> Result<Self, NameError> {
        let (prefix, rest) = requested
            .split_once('_')
            .ok_or(NameError::MalformedIdentifier)?;

        let id = ArtifactId::parse_canonical(prefix).ok_or(NameError::MalformedIdentifier)?;

        match secure_filename(rest) {
            Some(clean) if clean == rest => Ok(Self {
                id,
                display: clean,
            }),
            _ => Err(NameError::MalformedIdentifier),
        }
    }

    pub fn id(&self) -> ArtifactId {
        self.id
    }

    /// The name without its identifier prefix, as offered to the client.
    pub fn display(&self) -> &str {
        &self.display
    }

    /// The on-disk file name.
    pub fn file_name(&self) -> String {
        format!("{}_{}", self.id, self.display)
    }
}

impl fmt::Display for StoredName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.id, self.display)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{IdAllocator, RandomIdAllocator};

    const ID: &str = "550e8400-e29b-41d4-a716-446655440000";

    #[test]
    fn test_secure_filename_keeps_plain_names() {
        assert_eq!(secure_filename("song.m4a").as_deref(), Some("song.m4a"));
        assert_eq!(secure_filename("Track-01_final.m4a").as_deref(), Some("Track-01_final.m4a"));
    }

    #[test]
    fn test_secure_filename_strips_directories() {
        assert_eq!(secure_filename("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(secure_filename("C:\\Users\\me\\song.m4a").as_deref(), Some("song.m4a"));
        assert_eq!(secure_filename("/abs/path/song.m4a").as_deref(), Some("song.m4a"));
    }

    #[test]
    fn test_secure_filename_collapses_whitespace() {
        assert_eq!(secure_filename("My  Great\tSong.m4a").as_deref(), Some("My_Great_Song.m4a"));
        assert_eq!(secure_filename("  padded .m4a").as_deref(), Some("padded_.m4a"));
    }

    #[test]
    fn test_secure_filename_drops_unsafe_characters() {
        assert_eq!(secure_filename("so\u{0}ng\u{7}.m4a").as_deref(), Some("song.m4a"));
        assert_eq!(secure_filename("caf\u{e9} $(rm -rf).m4a").as_deref(), Some("caf_rm_-rf.m4a"));
        assert_eq!(secure_filename("..hidden.m4a").as_deref(), Some("hidden.m4a"));
    }

    #[test]
    fn test_secure_filename_empty_results() {
        assert_eq!(secure_filename(""), None);
        assert_eq!(secure_filename(".."), None);
        assert_eq!(secure_filename("dir/"), None);
        assert_eq!(secure_filename("\u{65e5}\u{672c}"), None);
    }

    #[test]
    fn test_secure_filename_truncates_keeping_extension() {
        let long = format!("{}.m4a", "a".repeat(500));
        let clean = secure_filename(&long).unwrap();
        assert_eq!(clean.len(), MAX_DISPLAY_LEN);
        assert!(clean.ends_with(".m4a"));
    }

    #[test]
    fn test_secure_filename_is_idempotent() {
        for raw in ["song.m4a", "a b/c d.m4a", "__x__.m4a", "weird!!name?.m4a"] {
            let once = secure_filename(raw).unwrap();
            assert_eq!(secure_filename(&once).as_deref(), Some(once.as_str()));
        }
    }

    #[test]
    fn test_has_allowed_extension() {
        let allowed = ["m4a"];
        assert!(has_allowed_extension("song.m4a", &allowed));
        assert!(has_allowed_extension("song.M4A", &allowed));
        assert!(has_allowed_extension("a.b.m4a", &allowed));
        assert!(!has_allowed_extension("song.txt", &allowed));
        assert!(!has_allowed_extension("m4a", &allowed));
        assert!(!has_allowed_extension(".m4a", &allowed));
        assert!(!has_allowed_extension("song.", &allowed));
    }

    #[test]
    fn test_output_name_replaces_extension() {
        assert_eq!(output_name("song.m4a"), "song.mp3");
        assert_eq!(output_name("a.b.m4a"), "a.b.mp3");
        assert_eq!(output_name("noext"), "noext.mp3");
    }

    #[test]
    fn test_stored_name_round_trip() {
        let id = RandomIdAllocator.allocate();
        let stored = StoredName::new(id, "song.mp3");
        let parsed = StoredName::parse(&stored.file_name()).unwrap();

        assert_eq!(parsed, stored);
        assert_eq!(parsed.display(), "song.mp3");
        assert_eq!(parsed.to_string(), stored.file_name());
    }

    #[test]
    fn test_stored_name_keeps_underscores_in_display() {
        let parsed = StoredName::parse(&format!("{}_my_song.mp3", ID)).unwrap();
        assert_eq!(parsed.display(), "my_song.mp3");
    }

    #[test]
    fn test_stored_name_rejects_bad_prefix() {
        for name in [
            "song.mp3",
            "_song.mp3",
            "not-a-uuid_song.mp3",
            "..%2F..%2Fetc_passwd",
            "550e8400-e29b-41d4-a716-44665544000_song.mp3",
            "550E8400-E29B-41D4-A716-446655440000_song.mp3",
        ] {
            assert_eq!(
                StoredName::parse(name),
                Err(NameError::MalformedIdentifier),
                "accepted {:?}",
                name
            );
        }
    }

    #[test]
    fn test_stored_name_rejects_unsanitized_rest() {
        for rest in ["", "..", "../x.mp3", "a/b.mp3", "a b.mp3", "a\\b.mp3", ".hidden"] {
            let name = format!("{}_{}", ID, rest);
            assert!(StoredName::parse(&name).is_err(), "accepted {:?}", name);
        }
    }
}
