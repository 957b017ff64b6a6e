//! Content identity normalization
//!
//! Turns an artifact filename into the canonical string used for
//! cross-url deduplication. Channel watermarks are stripped first, then
//! everything except ASCII alphanumerics and Sinhala script is dropped.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Channel watermark patterns, applied in order
    static ref WATERMARKS: Vec<Regex> = [
        r"(?i)\(@[^)]+\)\s*",
        r"(?i)@SinhalaSubtitles[_\-]?Rezoth[_\-]?\s*",
        r"(?i)@[A-Za-z0-9_]+[_\-]\s*",
        r"(?i)\s*\(@[^)]+\)",
        r"(?i)^\s*@[A-Za-z0-9_]+\s+",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect();

    static ref EXTENSION: Regex = Regex::new(r"\.[^.]+$").unwrap();
    static ref NON_IDENTITY_CHARS: Regex = Regex::new(r"[^a-z0-9\x{0D80}-\x{0DFF}]").unwrap();
    static ref YEAR: Regex = Regex::new(r"[.\-_\s(]?((?:19[89]|20[0-2])\d)[.\-_\s)]?").unwrap();
    static ref YEAR_AND_REST: Regex = Regex::new(r"[.\-_\s(]?(?:19[89]|20[0-2])\d[.\-_\s)]?.*").unwrap();
    static ref EPISODE: Regex = Regex::new(r"[Ss](\d{1,2})[Ee](\d{1,2})").unwrap();
    static ref EPISODE_AND_REST: Regex = Regex::new(r"[Ss]\d{1,2}[Ee]\d{1,2}.*").unwrap();
}

/// Release details pulled out of a filename
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseInfo {
    /// Normalized title with year, episode marker and everything after removed
    pub base_name: String,

    /// Release year (1980-2029)
    pub year: Option<u16>,

    pub season: Option<u8>,

    pub episode: Option<u8>,
}

fn strip_watermarks(raw: &str) -> String {
    WATERMARKS
        .iter()
        .fold(raw.to_string(), |name, pattern| {
            pattern.replace_all(&name, "").into_owned()
        })
}

/// Computes the content identity of a filename
///
/// Pure and infallible: empty input gives an empty identity, and input made
/// only of stripped characters degrades to an empty identity too.
///
/// # Example
///
/// ```
/// use subrelay::identity::normalize_name;
///
/// assert_eq!(normalize_name("Movie.2023.Sinhala (@SomeChannel)_.srt"), "movie2023sinhala");
/// assert_eq!(normalize_name("movie2023sinhala.srt"), "movie2023sinhala");
/// ```
pub fn normalize_name(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let name = strip_watermarks(raw).to_lowercase();
    let name = EXTENSION.replace(&name, "");
    NON_IDENTITY_CHARS.replace_all(&name, "").into_owned()
}

/// Extracts title, year, season and episode from a release filename
pub fn extract_release_info(raw: &str) -> ReleaseInfo {
    if raw.is_empty() {
        return ReleaseInfo::default();
    }

    let stripped = strip_watermarks(raw);
    let name = EXTENSION.replace(&stripped, "");

    let year = YEAR
        .captures(&name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok());

    let (season, episode) = match EPISODE.captures(&name) {
        Some(caps) => (
            caps.get(1).and_then(|m| m.as_str().parse().ok()),
            caps.get(2).and_then(|m| m.as_str().parse().ok()),
        ),
        None => (None, None),
    };

    let lowered = name.to_lowercase();
    let base = YEAR_AND_REST.replace(&lowered, "");
    let base = EPISODE_AND_REST.replace(&base, "");
    let base_name = NON_IDENTITY_CHARS.replace_all(&base, "").into_owned();

    ReleaseInfo {
        base_name,
        year,
        season,
        episode,
    }
}
