//! Documentation scraping from a sitemap.
//!
//! [`PageSource`] is the scrape seam used by the docs pipeline.
//! [`SitemapScraper`] reads a `<urlset>` sitemap (following
//! `<sitemapindex>` entries), filters URLs by glob on their path, and turns
//! each page into a [`Document`] with [`html_to_document`].
//!
//! Page text comes from `<main>` or `<article>` when present, otherwise
//! `<body>`, with navigation and non-content elements removed and
//! whitespace collapsed.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use scraper::{ElementRef, Html, Node, Selector};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::DocsConfig;
use crate::models::{Document, RawMetadata};

/// Elements whose content never reaches the page text.
const SKIPPED_ELEMENTS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "noscript", "svg", "template",
];

/// Nested sitemap indexes deeper than this are ignored.
const MAX_SITEMAP_DEPTH: usize = 3;

/// Source of documentation pages.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Page URLs to scrape, in sitemap order.
    async fn parse_sitemap(&self) -> Result<Vec<String>>;

    /// Fetch and normalize one page. `Ok(None)` means the page had no text.
    async fn scrape_page(&self, url: &str) -> Result<Option<Document>>;
}

/// Parsed content of one sitemap file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SitemapEntries {
    /// `<urlset>`: page URLs.
    Pages(Vec<String>),
    /// `<sitemapindex>`: URLs of further sitemaps.
    Sitemaps(Vec<String>),
}

/// Parse a sitemap or sitemap index, collecting every `<loc>`.
pub fn parse_sitemap_xml(xml: &str) -> Result<SitemapEntries> {
    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut root: Option<bool> = None; // Some(true) = sitemapindex
    let mut locs = Vec::new();
    let mut in_loc = false;
    let mut current = String::new();

    loop {
        match reader.read_event() {
            Ok(quick_xml::events::Event::Start(e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"urlset" if root.is_none() => root = Some(false),
                    b"sitemapindex" if root.is_none() => root = Some(true),
                    b"loc" => {
                        in_loc = true;
                        current.clear();
                    }
                    _ => {}
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if in_loc => {
                let text = te.unescape().context("invalid text in sitemap <loc>")?;
                current.push_str(&text);
            }
            Ok(quick_xml::events::Event::CData(cd)) if in_loc => {
                current.push_str(&String::from_utf8_lossy(&cd));
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"loc" {
                    in_loc = false;
                    let loc = current.trim();
                    if !loc.is_empty() {
                        locs.push(loc.to_string());
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => bail!("malformed sitemap XML: {}", e),
            _ => {}
        }
    }

    match root {
        Some(true) => Ok(SitemapEntries::Sitemaps(locs)),
        Some(false) => Ok(SitemapEntries::Pages(locs)),
        None => bail!("sitemap has neither <urlset> nor <sitemapindex> root"),
    }
}

/// Include/exclude globs matched against a URL's path.
///
/// An empty include list admits every path.
pub struct UrlFilter {
    include: Option<GlobSet>,
    exclude: GlobSet,
}

impl UrlFilter {
    pub fn new(include_globs: &[String], exclude_globs: &[String]) -> Result<Self> {
        let include = if include_globs.is_empty() {
            None
        } else {
            Some(build_globset(include_globs)?)
        };
        Ok(Self {
            include,
            exclude: build_globset(exclude_globs)?,
        })
    }

    pub fn allows(&self, url: &str) -> bool {
        let path = url_path(url);
        if self.exclude.is_match(path) {
            return false;
        }
        self.include.as_ref().map_or(true, |set| set.is_match(path))
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob '{}'", pattern))?);
    }
    Ok(builder.build()?)
}

/// Path portion of an absolute URL, without query or fragment.
fn url_path(url: &str) -> &str {
    let rest = match url.find("://") {
        Some(i) => &url[i + 3..],
        None => url,
    };
    let path = match rest.find('/') {
        Some(i) => &rest[i..],
        None => "/",
    };
    let end = path.find(['?', '#']).unwrap_or(path.len());
    &path[..end]
}

/// Normalize an HTML page into a [`Document`].
///
/// Returns `None` when no text remains after cleaning.
pub fn html_to_document(url: &str, html: &str) -> Option<Document> {
    let page = Html::parse_document(html);

    let root = ["main", "article", "body"]
        .iter()
        .filter_map(|tag| Selector::parse(tag).ok())
        .find_map(|sel| page.select(&sel).next())?;

    let mut raw = String::new();
    collect_text(root, &mut raw);
    let text = collapse_whitespace(&raw);
    if text.is_empty() {
        return None;
    }

    let title = first_text(&page, "title")
        .or_else(|| first_text(&page, "h1"))
        .unwrap_or_default();

    let mut metadata = RawMetadata::new();
    metadata.insert("source".into(), json!(url));
    metadata.insert("title".into(), json!(title));
    if let Some(description) = meta_description(&page) {
        metadata.insert("description".into(), json!(description));
    }
    metadata.insert("type".into(), json!("docs"));

    Some(Document::new(text, metadata))
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                out.push_str(text);
                out.push(' ');
            }
            Node::Element(el) if SKIPPED_ELEMENTS.contains(&el.name()) => {}
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, out);
                }
            }
            _ => {}
        }
    }
}

fn first_text(page: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    let el = page.select(&sel).next()?;
    let text = collapse_whitespace(&el.text().collect::<String>());
    (!text.is_empty()).then_some(text)
}

fn meta_description(page: &Html) -> Option<String> {
    let sel = Selector::parse(r#"meta[name="description"]"#).ok()?;
    let content = page.select(&sel).next()?.value().attr("content")?;
    let content = collapse_whitespace(content);
    (!content.is_empty()).then_some(content)
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// HTTP scraper for a sitemap-driven documentation site.
pub struct SitemapScraper {
    client: reqwest::Client,
    sitemap_url: String,
    filter: UrlFilter,
}

impl SitemapScraper {
    pub fn from_config(config: &DocsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("knowledge-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build scraper HTTP client")?;
        Ok(Self {
            client,
            sitemap_url: config.sitemap_url.clone(),
            filter: UrlFilter::new(&config.include_globs, &config.exclude_globs)?,
        })
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;
        let status = resp.status();
        if !status.is_success() {
            bail!("GET {} returned {}", url, status);
        }
        resp.text()
            .await
            .with_context(|| format!("failed to read body of {}", url))
    }
}

#[async_trait]
impl PageSource for SitemapScraper {
    async fn parse_sitemap(&self) -> Result<Vec<String>> {
        let mut pages = Vec::new();
        let mut pending = vec![(self.sitemap_url.clone(), 0usize)];

        while let Some((sitemap_url, depth)) = pending.pop() {
            let xml = self.fetch_text(&sitemap_url).await?;
            match parse_sitemap_xml(&xml)
                .with_context(|| format!("failed to parse sitemap {}", sitemap_url))?
            {
                SitemapEntries::Pages(urls) => pages.extend(urls),
                SitemapEntries::Sitemaps(children) if depth < MAX_SITEMAP_DEPTH => {
                    debug!(sitemap = %sitemap_url, children = children.len(), "following sitemap index");
                    // Reverse so children are visited in document order.
                    pending.extend(children.into_iter().rev().map(|c| (c, depth + 1)));
                }
                SitemapEntries::Sitemaps(_) => {
                    debug!(sitemap = %sitemap_url, "sitemap index nested too deeply, skipped");
                }
            }
        }

        let total = pages.len();
        pages.retain(|url| self.filter.allows(url));
        info!(total, kept = pages.len(), "parsed sitemap");
        Ok(pages)
    }

    async fn scrape_page(&self, url: &str) -> Result<Option<Document>> {
        let html = self.fetch_text(url).await?;
        Ok(html_to_document(url, &html))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_urlset() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://docs.dagster.io/getting-started</loc><lastmod>2024-01-01</lastmod></url>
  <url><loc> https://docs.dagster.io/concepts?a=1&amp;b=2 </loc></url>
</urlset>"#;
        assert_eq!(
            parse_sitemap_xml(xml).unwrap(),
            SitemapEntries::Pages(vec![
                "https://docs.dagster.io/getting-started".into(),
                "https://docs.dagster.io/concepts?a=1&b=2".into(),
            ])
        );
    }

    #[test]
    fn test_parse_sitemap_index() {
        let xml = r#"<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>https://docs.dagster.io/sitemap-0.xml</loc></sitemap>
  <sitemap><loc>https://docs.dagster.io/sitemap-1.xml</loc></sitemap>
</sitemapindex>"#;
        assert_eq!(
            parse_sitemap_xml(xml).unwrap(),
            SitemapEntries::Sitemaps(vec![
                "https://docs.dagster.io/sitemap-0.xml".into(),
                "https://docs.dagster.io/sitemap-1.xml".into(),
            ])
        );
    }

    #[test]
    fn test_parse_rejects_non_sitemap() {
        assert!(parse_sitemap_xml("<html><body/></html>").is_err());
    }

    #[test]
    fn test_url_filter() {
        let filter = UrlFilter::new(
            &["/concepts/**".to_string(), "/guides/**".to_string()],
            &["**/deprecated/**".to_string()],
        )
        .unwrap();
        assert!(filter.allows("https://docs.dagster.io/concepts/assets"));
        assert!(filter.allows("https://docs.dagster.io/guides/build?tab=py#top"));
        assert!(!filter.allows("https://docs.dagster.io/concepts/deprecated/solids"));
        assert!(!filter.allows("https://docs.dagster.io/api/python"));

        let open = UrlFilter::new(&[], &[]).unwrap();
        assert!(open.allows("https://docs.dagster.io/"));
    }

    #[test]
    fn test_url_path() {
        assert_eq!(url_path("https://docs.dagster.io/a/b?x=1"), "/a/b");
        assert_eq!(url_path("https://docs.dagster.io"), "/");
    }

    #[test]
    fn test_html_cleaning_prefers_main() {
        let html = r#"<html><head>
  <title>Assets | Dagster Docs</title>
  <meta name="description" content="Software-defined assets.">
  <script>var tracking = 1;</script>
</head><body>
  <nav>Home Docs Blog</nav>
  <header>Search</header>
  <main>
    <h1>Assets</h1>
    <p>An asset is an   object in persistent storage.</p>
    <script>ignored()</script>
    <aside>Related</aside>
  </main>
  <footer>Copyright</footer>
</body></html>"#;
        let doc = html_to_document("https://docs.dagster.io/concepts/assets", html).unwrap();
        assert_eq!(doc.text, "Assets An asset is an object in persistent storage.");
        assert_eq!(doc.metadata["title"], "Assets | Dagster Docs");
        assert_eq!(doc.metadata["description"], "Software-defined assets.");
        assert_eq!(doc.metadata["type"], "docs");
        assert_eq!(doc.source(), Some("https://docs.dagster.io/concepts/assets"));
    }

    #[test]
    fn test_html_body_fallback_and_empty() {
        let doc = html_to_document(
            "https://x.test/p",
            "<html><body><nav>menu</nav><div>Plain body text</div></body></html>",
        )
        .unwrap();
        assert_eq!(doc.text, "Plain body text");
        assert!(doc.metadata.get("description").is_none());

        assert!(html_to_document(
            "https://x.test/empty",
            "<html><body><script>x()</script><nav>menu</nav></body></html>"
        )
        .is_none());
    }
}
