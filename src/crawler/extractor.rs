//! Per-site HTML extraction
//!
//! Each supported site is a [`SiteKind`] variant. A [`LinkExtractor`] pairs
//! the variant with the site's base url and dispatches on it for:
//! - detail links on a listing page
//! - the title of a detail page
//! - the artifact download location on a detail page
//! - the file link on an intermediate download page

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

lazy_static! {
    static ref SUB_ID: Regex = Regex::new(r"sub_id=(\d+)").unwrap();
    static ref NONCE: Regex = Regex::new(r"nonce=([^&]+)").unwrap();
}

/// Title used when a detail page has none
pub const UNKNOWN_TITLE: &str = "Unknown";

const ARTIFACT_EXTENSIONS: &[&str] = &[".zip", ".rar", ".srt"];

/// Supported source sites
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteKind {
    Subz,
    Zoom,
    Baiscope,
}

impl fmt::Display for SiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Subz => "subz",
            Self::Zoom => "zoom",
            Self::Baiscope => "baiscope",
        };
        write!(f, "{}", name)
    }
}

/// Extraction rules for one site
#[derive(Debug, Clone)]
pub struct LinkExtractor {
    site: SiteKind,
    base_url: Url,
}

impl LinkExtractor {
    pub fn new(site: SiteKind, base_url: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            site,
            base_url: Url::parse(base_url)?,
        })
    }

    pub fn site(&self) -> SiteKind {
        self.site
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Listing page url: the category itself for page 1, `{category}page/{n}/` after
    pub fn listing_url(&self, category: &str, page: u32) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        let category = category.trim_matches('/');
        if page <= 1 {
            format!("{}/{}/", base, category)
        } else {
            format!("{}/{}/page/{}/", base, category, page)
        }
    }

    /// Returns true if `url` is served by this site (ignoring a `www.` prefix)
    pub fn is_same_site(&self, url: &str) -> bool {
        match Url::parse(url) {
            Ok(parsed) => host_key(&parsed) == host_key(&self.base_url),
            Err(_) => false,
        }
    }

    /// Detail page links on a listing page, absolute, deduplicated, in page order
    pub fn extract_detail_links(&self, html: &str) -> Vec<String> {
        let document = Html::parse_document(html);

        let candidates: Vec<String> = match self.site {
            SiteKind::Subz => hrefs(&document, "a[href]")
                .into_iter()
                .filter(|href| href.to_lowercase().contains("sinhala-subtitle"))
                .collect(),
            SiteKind::Zoom => hrefs(&document, "h3.entry-title a[href]")
                .into_iter()
                .filter(|href| !href.contains("/category/") && !href.contains("/page/"))
                .collect(),
            SiteKind::Baiscope => hrefs(&document, "a[href]")
                .into_iter()
                .filter(|href| {
                    let lower = href.to_lowercase();
                    lower.contains("-sinhala-subtitle")
                        && !lower.contains("/category/")
                        && !lower.contains("/tag/")
                })
                .collect(),
        };

        let mut links = Vec::new();
        for href in candidates {
            if let Some(url) = self.resolve(&href) {
                if self.is_same_site(&url) && !links.contains(&url) {
                    links.push(url);
                }
            }
        }
        links
    }

    /// Title of a detail page, or [`UNKNOWN_TITLE`]
    pub fn extract_title(&self, html: &str) -> String {
        let document = Html::parse_document(html);

        let node = match self.site {
            SiteKind::Subz => {
                select_first(&document, "h2.subz_title").or_else(|| select_first(&document, "h1"))
            }
            SiteKind::Zoom => select_first(&document, "h1.entry-title")
                .or_else(|| select_first(&document, "h1")),
            SiteKind::Baiscope => select_first(&document, "h1"),
        };

        let title = node.map(element_text).unwrap_or_default();
        let title = match self.site {
            SiteKind::Subz => title.replace(" Sinhala Subtitle", ""),
            _ => title,
        };
        let title = title.trim();

        if title.is_empty() {
            UNKNOWN_TITLE.to_string()
        } else {
            title.to_string()
        }
    }

    /// Where the artifact of a detail page can be downloaded from
    pub fn extract_artifact_location(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);

        match self.site {
            SiteKind::Subz => {
                let href = select_first(&document, "a.sub-download")?
                    .value()
                    .attr("href")?
                    .to_string();
                let sub_id = SUB_ID.captures(&href)?.get(1)?.as_str().to_string();
                let nonce = NONCE.captures(&href)?.get(1)?.as_str().to_string();
                let mut url = self.base_url.join("/wp-admin/admin-ajax.php").ok()?;
                url.query_pairs_mut()
                    .append_pair("action", "sub_download")
                    .append_pair("sub_id", &sub_id)
                    .append_pair("nonce", &nonce);
                Some(url.to_string())
            }
            SiteKind::Zoom => {
                let href = select_first(&document, "a.download-button")
                    .and_then(|a| a.value().attr("href"))
                    .map(|s| s.to_string())
                    .or_else(|| {
                        hrefs(&document, "a[href]")
                            .into_iter()
                            .find(|href| href.contains("sub-download"))
                    })?;
                self.resolve(&href)
            }
            SiteKind::Baiscope => {
                let links = hrefs(&document, "a[href]");
                let href = links
                    .iter()
                    .find(|href| {
                        let lower = href.to_lowercase();
                        ARTIFACT_EXTENSIONS.iter().any(|ext| lower.contains(ext))
                    })
                    .or_else(|| {
                        links.iter().find(|href| {
                            href.to_lowercase().contains("download")
                                && (href.contains('?') || href.contains(".php"))
                        })
                    })
                    .cloned()
                    .or_else(|| baiscope_download_button(&document))?;
                self.resolve(&href)
            }
        }
    }

    /// File link on an intermediate download page
    ///
    /// Prefers a link ending in an archive or subtitle extension, then any
    /// anchor whose text mentions "download".
    pub fn extract_file_link(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        let selector = Selector::parse("a[href]").ok()?;

        let anchors: Vec<ElementRef> = document.select(&selector).collect();
        let by_extension = anchors.iter().find_map(|a| {
            let href = a.value().attr("href")?;
            let path = href.split(['?', '#']).next().unwrap_or(href).to_lowercase();
            ARTIFACT_EXTENSIONS
                .iter()
                .any(|ext| path.ends_with(ext))
                .then(|| href.to_string())
        });
        let href = by_extension.or_else(|| {
            anchors.iter().find_map(|a| {
                element_text(*a)
                    .to_lowercase()
                    .contains("download")
                    .then(|| a.value().attr("href").map(|s| s.to_string()))
                    .flatten()
            })
        })?;

        self.resolve(&href)
    }

    fn resolve(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
        {
            return None;
        }

        let mut url = self.base_url.join(href).ok()?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return None;
        }
        url.set_fragment(None);
        Some(url.to_string())
    }
}

fn baiscope_download_button(document: &Html) -> Option<String> {
    let selector = Selector::parse("a[href]").ok()?;
    document.select(&selector).find_map(|a| {
        let href = a.value().attr("href")?;
        if href.contains("baiscopedownloads.link") {
            return None;
        }
        let text = element_text(a).to_lowercase();
        ["download subtitle", "get subtitle", ".srt", ".zip"]
            .iter()
            .any(|keyword| text.contains(keyword))
            .then(|| href.to_string())
    })
}

fn host_key(url: &Url) -> String {
    url.host_str()
        .unwrap_or_default()
        .trim_start_matches("www.")
        .to_lowercase()
}

fn select_first<'a>(document: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    document.select(&selector).next()
}

fn hrefs(document: &Html, css: &str) -> Vec<String> {
    match Selector::parse(css) {
        Ok(selector) => document
            .select(&selector)
            .filter_map(|element| element.value().attr("href"))
            .map(|href| href.to_string())
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn element_text(element: ElementRef) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
