// audiodrop core - identifiers, filenames and artifact lifecycle

pub mod bitrate;
pub mod error;
pub mod filename;
pub mod id;
pub mod lifecycle;

pub use bitrate::Bitrate;
pub use error::{BitrateError, LifecycleError, NameError};
pub use filename::{has_allowed_extension, output_name, secure_filename, StoredName};
pub use id::{ArtifactId, IdAllocator, RandomIdAllocator};
pub use lifecycle::{ArtifactRecord, ArtifactRole, LifecycleState};
