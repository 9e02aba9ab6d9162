//! Lifecycle of a single conversion job.
//!
//! A record only moves forward:
//!
//! ```text
//! Uploading -> Converting -> Converted -> Downloadable -> Expired -> Deleted
//!     |            |             |              |
//!     +------------+-------------+--> Failed    +--> Deleted
//! ```
//!
//! `Deleted` and `Failed` are terminal. Records are never reused.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bitrate::Bitrate;
use crate::error::LifecycleError;
use crate::filename::{output_name, StoredName};
use crate::id::ArtifactId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uploading,
    Converting,
    Converted,
    Downloadable,
    Expired,
    Deleted,
    Failed,
}

impl LifecycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Deleted | Self::Failed)
    }

    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Uploading, Converting)
                | (Uploading, Failed)
                | (Converting, Converted)
                | (Converting, Failed)
                | (Converted, Downloadable)
                | (Converted, Failed)
                | (Downloadable, Expired)
                | (Downloadable, Deleted)
                | (Expired, Deleted)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Converting => "converting",
            Self::Converted => "converted",
            Self::Downloadable => "downloadable",
            Self::Expired => "expired",
            Self::Deleted => "deleted",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which half of a conversion job a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactRole {
    Input,
    Output,
}

/// One conversion job, from upload to deletion.
///
/// The conversion pipeline owns the record up to `Downloadable`. After that
/// only the stored output remains, and the retention scheduler reports its
/// `Expired` and `Deleted` transitions as log events keyed by stored name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: ArtifactId,
    /// Filename exactly as the client sent it.
    pub original_filename: String,
    /// Sanitized input name (no identifier prefix).
    pub input_name: String,
    /// Derived output name, `{stem}.mp3` (no identifier prefix).
    pub output_name: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub bitrate: Bitrate,
    pub created_at: DateTime<Utc>,
    state: LifecycleState,
}

impl ArtifactRecord {
    /// Starts a record in the `Uploading` state.
    ///
    /// `input_name` must already be sanitized; the output name is derived
    /// from it. `resolve` is the storage layer's path for each half.
    pub fn new(
        id: ArtifactId,
        original_filename: impl Into<String>,
        input_name: impl Into<String>,
        bitrate: Bitrate,
        resolve: impl Fn(ArtifactRole) -> PathBuf,
    ) -> Self {
        let input_name = input_name.into();
        let output_name = output_name(&input_name);
        let input_path = resolve(ArtifactRole::Input);
        let output_path = resolve(ArtifactRole::Output);

        Self {
            id,
            original_filename: original_filename.into(),
            input_name,
            output_name,
            input_path,
            output_path,
            bitrate,
            created_at: Utc::now(),
            state: LifecycleState::Uploading,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Moves the record forward, rejecting anything off the transition table.
    pub fn advance(&mut self, next: LifecycleState) -> Result<(), LifecycleError> {
        if !self.state.can_transition_to(next) {
            return Err(LifecycleError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    pub fn input_stored_name(&self) -> StoredName {
        StoredName::new(self.id, self.input_name.clone())
    }

    pub fn output_stored_name(&self) -> StoredName {
        StoredName::new(self.id, self.output_name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{IdAllocator, RandomIdAllocator};
    use std::path::Path;

    fn make_record() -> ArtifactRecord {
        let id = RandomIdAllocator.allocate();
        ArtifactRecord::new(id, "My Song.m4a", "My_Song.m4a", Bitrate::default(), |role| {
            let display = match role {
                ArtifactRole::Input => "My_Song.m4a".to_string(),
                ArtifactRole::Output => output_name("My_Song.m4a"),
            };
            Path::new("/srv/audiodrop").join(StoredName::new(id, display).file_name())
        })
    }

    #[test]
    fn test_new_record_derives_names_and_paths() {
        let record = make_record();
        let id = record.id.to_string();

        assert_eq!(record.state(), LifecycleState::Uploading);
        assert_eq!(record.output_name, "My_Song.mp3");
        assert_eq!(
            record.input_path,
            Path::new("/srv/audiodrop").join(format!("{}_My_Song.m4a", id))
        );
        assert_eq!(
            record.output_path,
            Path::new("/srv/audiodrop").join(format!("{}_My_Song.mp3", id))
        );
        assert_eq!(record.output_stored_name().display(), "My_Song.mp3");
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut record = make_record();
        for next in [
            LifecycleState::Converting,
            LifecycleState::Converted,
            LifecycleState::Downloadable,
            LifecycleState::Expired,
            LifecycleState::Deleted,
        ] {
            record.advance(next).unwrap();
        }
        assert!(record.state().is_terminal());
    }

    #[test]
    fn test_failure_is_terminal() {
        let mut record = make_record();
        record.advance(LifecycleState::Converting).unwrap();
        record.advance(LifecycleState::Failed).unwrap();

        let err = record.advance(LifecycleState::Converting).unwrap_err();
        assert_eq!(
            err,
            LifecycleError::IllegalTransition {
                from: LifecycleState::Failed,
                to: LifecycleState::Converting,
            }
        );
    }

    #[test]
    fn test_no_backwards_or_skipping_transitions() {
        let mut record = make_record();
        assert!(record.advance(LifecycleState::Downloadable).is_err());
        record.advance(LifecycleState::Converting).unwrap();
        assert!(record.advance(LifecycleState::Uploading).is_err());
        assert_eq!(record.state(), LifecycleState::Converting);
    }

    #[test]
    fn test_downloadable_cannot_fail() {
        assert!(!LifecycleState::Downloadable.can_transition_to(LifecycleState::Failed));
        assert!(LifecycleState::Downloadable.can_transition_to(LifecycleState::Deleted));
    }
}
