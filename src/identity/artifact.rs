//! Artifact type sniffing and filename derivation

/// Artifact container type, decided from magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Zip,
    Rar,
    /// Anything else is treated as a plain SubRip text file
    Subrip,
}

impl ArtifactKind {
    /// Inspects the leading bytes of a download
    ///
    /// The server-declared content type and extension are ignored; mirrors
    /// routinely serve archives as `text/plain` or `.srt` as `application/zip`.
    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.starts_with(b"PK\x03\x04") {
            Self::Zip
        } else if bytes.starts_with(b"Rar!") {
            Self::Rar
        } else {
            Self::Subrip
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::Rar => "rar",
            Self::Subrip => "srt",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Zip => "application/zip",
            Self::Rar => "application/x-rar-compressed",
            Self::Subrip => "application/x-subrip",
        }
    }
}

/// Maximum title characters kept in a derived filename
pub const MAX_FILENAME_STEM: usize = 100;

/// Builds the relay filename from a page title and the sniffed kind
///
/// # Example
///
/// ```
/// use subrelay::identity::{artifact_filename, ArtifactKind};
///
/// assert_eq!(artifact_filename("Dune: Part Two", ArtifactKind::Zip), "Dune Part Two.zip");
/// ```
pub fn artifact_filename(title: &str, kind: ArtifactKind) -> String {
    let sanitized = sanitize_filename::sanitize(title);
    let stem: String = sanitized.trim().chars().take(MAX_FILENAME_STEM).collect();
    let stem = stem.trim();
    let stem = if stem.is_empty() { "subtitle" } else { stem };
    format!("{}.{}", stem, kind.extension())
}

/// Returns true if a download is an HTML document rather than an artifact
///
/// Used to detect intermediate "click here to download" pages.
pub fn looks_like_html(bytes: &[u8]) -> bool {
    if ArtifactKind::sniff(bytes) != ArtifactKind::Subrip {
        return false;
    }
    let head = &bytes[..bytes.len().min(512)];
    let head = String::from_utf8_lossy(head).to_lowercase();
    let head = head.trim_start();
    head.starts_with("<!doctype html") || head.starts_with("<html") || head.contains("<head")
}
