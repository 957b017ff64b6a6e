//! Content identity
//!
//! Everything needed to decide whether two downloads are "the same release":
//! filename normalization, release info parsing, and the sniffing/naming of
//! artifacts before they are relayed.

mod artifact;
mod normalize;

pub use artifact::{artifact_filename, looks_like_html, ArtifactKind, MAX_FILENAME_STEM};
pub use normalize::{extract_release_info, normalize_name, ReleaseInfo};
