//! HTTP metadata fetcher backed by `reqwest` and `scraper`.
//!
//! Each call downloads the page once and extracts one snapshot:
//!
//! | Snapshot | Keys |
//! |----------|------|
//! | metadata | `title`, `description`, `url`, `siteName`, `author`, `publishedDate`, `tags`, `structuredData` |
//! | images   | `primary`, `twitter`, `icon`, `gallery` |
//!
//! Missing values are omitted rather than stored as `null`, so that a page
//! losing a tag shows up as a removed key in change detection.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use scraper::{Html, Selector};
use serde_json::Value;

use super::MetadataFetcher;
use crate::config::FetcherConfig;
use crate::error::{Error, FetchError, Result};
use crate::snapshot::Snapshot;

const MAX_GALLERY_IMAGES: usize = 20;

macro_rules! selector {
    ($name:ident, $css:expr) => {
        static $name: LazyLock<Selector> =
            LazyLock::new(|| Selector::parse($css).expect(concat!("invalid selector: ", $css)));
    };
}

selector!(TITLE, "title");
selector!(OG_TITLE, r#"meta[property="og:title"]"#);
selector!(OG_DESCRIPTION, r#"meta[property="og:description"]"#);
selector!(META_DESCRIPTION, r#"meta[name="description"]"#);
selector!(OG_URL, r#"meta[property="og:url"]"#);
selector!(CANONICAL, r#"link[rel="canonical"]"#);
selector!(OG_SITE_NAME, r#"meta[property="og:site_name"]"#);
selector!(AUTHOR, r#"meta[name="author"]"#);
selector!(PUBLISHED, r#"meta[property="article:published_time"]"#);
selector!(ARTICLE_TAG, r#"meta[property="article:tag"]"#);
selector!(KEYWORDS, r#"meta[name="keywords"]"#);
selector!(JSON_LD, r#"script[type="application/ld+json"]"#);
selector!(OG_IMAGE, r#"meta[property="og:image"]"#);
selector!(TWITTER_IMAGE, r#"meta[name="twitter:image"]"#);
selector!(ICON, r#"link[rel~="icon"]"#);
selector!(IMG, "img[src]");

/// Fetches pages over HTTP and scrapes them into snapshots.
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpFetcher {
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::validation(format!("invalid [fetcher] config: {}", e)))?;
        Ok(Self {
            client,
            timeout_secs: config.timeout_secs,
        })
    }

    /// Download `url`, returning the body and the final (post-redirect) URL.
    async fn get_page(&self, url: &str) -> std::result::Result<(String, Url), FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().clone();
        let body = response.text().await.map_err(|e| self.classify(url, e))?;
        Ok((body, final_url))
    }

    fn classify(&self, url: &str, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                secs: self.timeout_secs,
            }
        } else if e.is_decode() {
            FetchError::Parse {
                url: url.to_string(),
                message: e.to_string(),
            }
        } else {
            FetchError::Network {
                url: url.to_string(),
                message: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl MetadataFetcher for HttpFetcher {
    async fn fetch_metadata(&self, url: &str) -> std::result::Result<Snapshot, FetchError> {
        let (body, base) = self.get_page(url).await?;
        Ok(extract_metadata(&body, &base))
    }

    async fn fetch_images(&self, url: &str) -> std::result::Result<Snapshot, FetchError> {
        let (body, base) = self.get_page(url).await?;
        Ok(extract_images(&body, &base))
    }
}

fn attr(document: &Html, selector: &Selector, name: &str) -> Option<String> {
    document
        .select(selector)
        .filter_map(|el| el.value().attr(name))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(String::from)
}

fn text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .find(|t| !t.is_empty())
}

fn resolve(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

fn insert_str(snapshot: &mut Snapshot, key: &str, value: Option<String>) {
    if let Some(v) = value {
        snapshot.insert(key.to_string(), Value::String(v));
    }
}

pub(crate) fn extract_metadata(body: &str, base: &Url) -> Snapshot {
    let document = Html::parse_document(body);
    let mut snapshot = Snapshot::new();

    insert_str(
        &mut snapshot,
        "title",
        attr(&document, &OG_TITLE, "content").or_else(|| text(&document, &TITLE)),
    );
    insert_str(
        &mut snapshot,
        "description",
        attr(&document, &OG_DESCRIPTION, "content")
            .or_else(|| attr(&document, &META_DESCRIPTION, "content")),
    );
    let canonical = attr(&document, &OG_URL, "content")
        .or_else(|| attr(&document, &CANONICAL, "href"))
        .map(|href| resolve(base, &href))
        .unwrap_or_else(|| base.to_string());
    snapshot.insert("url".to_string(), Value::String(canonical));
    insert_str(
        &mut snapshot,
        "siteName",
        attr(&document, &OG_SITE_NAME, "content"),
    );
    insert_str(&mut snapshot, "author", attr(&document, &AUTHOR, "content"));
    insert_str(
        &mut snapshot,
        "publishedDate",
        attr(&document, &PUBLISHED, "content"),
    );

    let mut tags: Vec<String> = document
        .select(&ARTICLE_TAG)
        .filter_map(|el| el.value().attr("content"))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if let Some(keywords) = attr(&document, &KEYWORDS, "content") {
        for keyword in keywords.split(',').map(str::trim).filter(|k| !k.is_empty()) {
            if !tags.iter().any(|t| t == keyword) {
                tags.push(keyword.to_string());
            }
        }
    }
    if !tags.is_empty() {
        snapshot.insert(
            "tags".to_string(),
            Value::Array(tags.into_iter().map(Value::String).collect()),
        );
    }

    // Malformed JSON-LD blocks are common in the wild; skip them.
    let structured: Vec<Value> = document
        .select(&JSON_LD)
        .filter_map(|el| serde_json::from_str::<Value>(&el.text().collect::<String>()).ok())
        .collect();
    if !structured.is_empty() {
        snapshot.insert("structuredData".to_string(), Value::Array(structured));
    }

    snapshot
}

pub(crate) fn extract_images(body: &str, base: &Url) -> Snapshot {
    let document = Html::parse_document(body);
    let mut snapshot = Snapshot::new();

    let resolved = |selector: &Selector, name: &str| {
        attr(&document, selector, name).map(|href| resolve(base, &href))
    };
    insert_str(&mut snapshot, "primary", resolved(&*OG_IMAGE, "content"));
    insert_str(&mut snapshot, "twitter", resolved(&*TWITTER_IMAGE, "content"));
    insert_str(&mut snapshot, "icon", resolved(&*ICON, "href"));

    let mut gallery: Vec<String> = Vec::new();
    for src in document
        .select(&IMG)
        .filter_map(|el| el.value().attr("src"))
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.starts_with("data:"))
    {
        let url = resolve(base, src);
        if !gallery.contains(&url) {
            gallery.push(url);
        }
        if gallery.len() >= MAX_GALLERY_IMAGES {
            break;
        }
    }
    if !gallery.is_empty() {
        snapshot.insert(
            "gallery".to_string(),
            Value::Array(gallery.into_iter().map(Value::String).collect()),
        );
    }

    snapshot
}
