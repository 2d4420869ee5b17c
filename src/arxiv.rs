//! arXiv Atom API client.
//!
//! Queries `export.arxiv.org/api/query` for the newest submissions in a set
//! of categories and turns the Atom feed into [`NewPaper`]s. The feed is
//! parsed with a small quick-xml event loop; only the fields the ranking
//! and enrichment pipelines need are kept.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::time::Duration;

use crate::config::ArxivConfig;
use crate::http;
use crate::models::{Author, NewPaper, PaperSource};

/// Build the query URL for one page of results, newest submissions first.
pub fn build_query_url(base_url: &str, categories: &[String], start: usize, max: usize) -> String {
    let query = if categories.is_empty() {
        "all".to_string()
    } else {
        categories
            .iter()
            .map(|c| format!("cat:{}", c))
            .collect::<Vec<_>>()
            .join("+OR+")
    };
    format!(
        "{}?search_query={}&start={}&max_results={}&sortBy=submittedDate&sortOrder=descending",
        base_url, query, start, max
    )
}

pub struct ArxivClient {
    client: reqwest::Client,
    config: ArxivConfig,
}

impl ArxivClient {
    pub fn new(config: &ArxivConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("paper-feed/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Fetch up to `max_results` of the newest papers across `categories`.
    ///
    /// Pages through the API `page_size` entries at a time and stops early
    /// when a page comes back short.
    pub async fn fetch_latest(
        &self,
        categories: &[String],
        max_results: usize,
    ) -> Result<Vec<NewPaper>> {
        let mut papers = Vec::new();
        let mut start = 0;

        while start < max_results {
            if start > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.page_delay_ms)).await;
            }

            let page = self.config.page_size.min(max_results - start);
            let url = build_query_url(&self.config.base_url, categories, start, page);
            tracing::info!(start, page, "fetching arXiv page");

            let response =
                http::send_with_retry("arXiv", self.config.max_retries, || self.client.get(&url))
                    .await?;
            let xml = response.text().await?;
            let batch = parse_atom_feed(&xml)?;
            let got = batch.len();
            papers.extend(batch);

            if got < page {
                break;
            }
            start += page;
        }

        Ok(papers)
    }
}

#[derive(Default)]
struct EntryAccum {
    id: String,
    title: String,
    summary: String,
    published: String,
    updated: String,
    authors: Vec<Author>,
    categories: Vec<String>,
    primary_category: Option<String>,
    abs_url: Option<String>,
    pdf_url: Option<String>,
    journal_ref: String,
}

impl EntryAccum {
    fn into_paper(self) -> Option<NewPaper> {
        let source_id = arxiv_id_from_url(&self.id)?;
        let title = collapse_whitespace(&self.title);
        let abstract_text = collapse_whitespace(&self.summary);
        if title.is_empty() {
            return None;
        }
        let published_at = parse_timestamp(&self.published)?;
        let updated_at = parse_timestamp(&self.updated).unwrap_or(published_at);
        let journal_ref = collapse_whitespace(&self.journal_ref);

        Some(NewPaper {
            source: PaperSource::Arxiv,
            url: self
                .abs_url
                .or_else(|| Some(format!("https://arxiv.org/abs/{}", source_id))),
            source_id,
            title,
            abstract_text,
            authors: self.authors,
            primary_category: self
                .primary_category
                .or_else(|| self.categories.first().cloned()),
            categories: self.categories,
            venue: (!journal_ref.is_empty()).then_some(journal_ref),
            pdf_url: self.pdf_url,
            published_at,
            updated_at,
        })
    }
}

/// Parse an arXiv Atom feed into papers. Entries without an id, title or
/// publication date are dropped.
pub fn parse_atom_feed(xml: &str) -> Result<Vec<NewPaper>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut papers = Vec::new();
    let mut accum = EntryAccum::default();
    let mut in_entry = false;
    let mut in_author = false;
    let mut current_tag = String::new();

    loop {
        match reader.read_event().context("Invalid arXiv Atom feed")? {
            Event::Start(e) => {
                let tag = local_name(&e);
                match tag.as_str() {
                    "entry" => {
                        in_entry = true;
                        accum = EntryAccum::default();
                    }
                    "author" if in_entry => {
                        in_author = true;
                        accum.authors.push(Author {
                            name: String::new(),
                            affiliation: None,
                        });
                    }
                    _ if in_entry => {
                        handle_attrs(&e, &tag, &mut accum);
                        current_tag = tag;
                    }
                    _ => {}
                }
            }
            Event::Empty(e) => {
                if in_entry {
                    handle_attrs(&e, &local_name(&e), &mut accum);
                }
            }
            Event::Text(t) => {
                if !in_entry {
                    continue;
                }
                let text = t.unescape().unwrap_or_default().to_string();
                push_text(&mut accum, &current_tag, &text, in_author);
            }
            Event::End(e) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"entry" => {
                        let finished = std::mem::take(&mut accum);
                        if let Some(paper) = finished.into_paper() {
                            papers.push(paper);
                        }
                        in_entry = false;
                    }
                    b"author" => {
                        in_author = false;
                        accum.authors.retain(|a| !a.name.is_empty());
                    }
                    _ => {}
                }
                current_tag.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(papers)
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_string()
}

fn attr(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key.as_bytes())
        .and_then(|a| a.unescape_value().ok().map(|v| v.to_string()))
}

fn handle_attrs(e: &BytesStart<'_>, tag: &str, accum: &mut EntryAccum) {
    match tag {
        "category" => {
            if let Some(term) = attr(e, "term") {
                if !accum.categories.contains(&term) {
                    accum.categories.push(term);
                }
            }
        }
        "primary_category" => {
            accum.primary_category = attr(e, "term");
        }
        "link" => {
            let href = match attr(e, "href") {
                Some(h) => h,
                None => return,
            };
            if attr(e, "title").as_deref() == Some("pdf") {
                accum.pdf_url = Some(href);
            } else if attr(e, "rel").as_deref() == Some("alternate") {
                accum.abs_url = Some(href);
            }
        }
        _ => {}
    }
}

fn push_text(accum: &mut EntryAccum, tag: &str, text: &str, in_author: bool) {
    match tag {
        "name" if in_author => {
            if let Some(author) = accum.authors.last_mut() {
                author.name.push_str(text.trim());
            }
        }
        "affiliation" if in_author => {
            if let Some(author) = accum.authors.last_mut() {
                author.affiliation = Some(text.trim().to_string());
            }
        }
        "id" => accum.id.push_str(text),
        "title" => accum.title.push_str(text),
        "summary" => accum.summary.push_str(text),
        "published" => accum.published.push_str(text),
        "updated" => accum.updated.push_str(text),
        "journal_ref" => accum.journal_ref.push_str(text),
        _ => {}
    }
}

/// Extract the arXiv id from an abs URL, dropping the version suffix.
///
/// `http://arxiv.org/abs/2401.01234v2` → `2401.01234`,
/// `http://arxiv.org/abs/math/0601001v1` → `math/0601001`.
pub fn arxiv_id_from_url(url: &str) -> Option<String> {
    let url = url.trim();
    let raw = match url.find("/abs/") {
        Some(pos) => &url[pos + 5..],
        None => url.rsplit('/').next()?,
    };
    if raw.is_empty() {
        return None;
    }
    if let Some(idx) = raw.rfind('v') {
        let suffix = &raw[idx + 1..];
        if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
            return Some(raw[..idx].to_string());
        }
    }
    Some(raw.to_string())
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Query, State};
    use axum::{routing::get, Router};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title type="html">ArXiv Query</title>
  <id>http://arxiv.org/api/abc</id>
  <entry>
    <id>http://arxiv.org/abs/2401.01234v2</id>
    <updated>2024-01-05T10:00:00Z</updated>
    <published>2024-01-02T18:59:59Z</published>
    <title>Sparse Attention
      for Long Documents</title>
    <summary>  We study sparse attention &amp; its
      limits.  </summary>
    <author><name>Ada Lovelace</name><arxiv:affiliation>Analytical Engines Ltd</arxiv:affiliation></author>
    <author><name>Alan Turing</name></author>
    <arxiv:journal_ref>ACL 2024</arxiv:journal_ref>
    <link href="http://arxiv.org/abs/2401.01234v2" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/2401.01234v2" rel="related" type="application/pdf"/>
    <arxiv:primary_category term="cs.CL" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.CL" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.LG" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/math/0601001v1</id>
    <published>2006-01-01T00:00:00Z</published>
    <title>Old Style Identifier</title>
    <summary>Classic.</summary>
    <author><name>Emmy Noether</name></author>
    <category term="math.AG"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2401.09999v1</id>
    <title>No publication date</title>
  </entry>
</feed>"#;

    #[test]
    fn parses_entries() {
        let papers = parse_atom_feed(FEED).unwrap();
        assert_eq!(papers.len(), 2);

        let p = &papers[0];
        assert_eq!(p.source_id, "2401.01234");
        assert_eq!(p.title, "Sparse Attention for Long Documents");
        assert_eq!(p.abstract_text, "We study sparse attention & its limits.");
        assert_eq!(p.authors.len(), 2);
        assert_eq!(p.authors[0].name, "Ada Lovelace");
        assert_eq!(
            p.authors[0].affiliation.as_deref(),
            Some("Analytical Engines Ltd")
        );
        assert_eq!(p.categories, vec!["cs.CL", "cs.LG"]);
        assert_eq!(p.primary_category.as_deref(), Some("cs.CL"));
        assert_eq!(p.venue.as_deref(), Some("ACL 2024"));
        assert_eq!(
            p.pdf_url.as_deref(),
            Some("http://arxiv.org/pdf/2401.01234v2")
        );
        assert!(p.updated_at > p.published_at);
    }

    #[test]
    fn old_style_ids_and_fallbacks() {
        let papers = parse_atom_feed(FEED).unwrap();
        let p = &papers[1];
        assert_eq!(p.source_id, "math/0601001");
        assert_eq!(p.primary_category.as_deref(), Some("math.AG"));
        assert_eq!(p.updated_at, p.published_at);
        assert_eq!(
            p.url.as_deref(),
            Some("https://arxiv.org/abs/math/0601001")
        );
    }

    #[test]
    fn id_without_version() {
        assert_eq!(
            arxiv_id_from_url("https://arxiv.org/abs/2301.07041").as_deref(),
            Some("2301.07041")
        );
        assert_eq!(arxiv_id_from_url("").as_deref(), None);
    }

    #[test]
    fn query_url_joins_categories() {
        let url = build_query_url(
            "https://export.arxiv.org/api/query",
            &["cs.CL".to_string(), "cs.LG".to_string()],
            100,
            50,
        );
        assert!(url.contains("search_query=cat:cs.CL+OR+cat:cs.LG"));
        assert!(url.contains("start=100"));
        assert!(url.contains("max_results=50"));
        assert!(url.contains("sortBy=submittedDate"));
    }

    /// Serves a three-entry corpus honouring `start`/`max_results`, and
    /// records the `start` of every request.
    async fn paged_server() -> (String, Arc<Mutex<Vec<usize>>>) {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route(
                "/api/query",
                get(
                    |State(starts): State<Arc<Mutex<Vec<usize>>>>,
                     Query(q): Query<HashMap<String, String>>| async move {
                        let start: usize = q["start"].parse().unwrap();
                        let max: usize = q["max_results"].parse().unwrap();
                        starts.lock().unwrap().push(start);
                        let entries: String = (start..(start + max).min(3))
                            .map(|i| {
                                format!(
                                    "<entry><id>http://arxiv.org/abs/2410.0000{i}v1</id>\
                                     <published>2024-10-0{d}T00:00:00Z</published>\
                                     <title>Paper {i}</title><summary>Abstract {i}</summary></entry>",
                                    i = i,
                                    d = i + 1
                                )
                            })
                            .collect();
                        format!(r#"<feed xmlns="http://www.w3.org/2005/Atom">{}</feed>"#, entries)
                    },
                ),
            )
            .with_state(Arc::clone(&starts));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/api/query", addr), starts)
    }

    fn paged_client(base_url: String) -> ArxivClient {
        ArxivClient::new(&ArxivConfig {
            base_url,
            page_size: 2,
            page_delay_ms: 0,
            max_retries: 0,
            ..ArxivConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn fetch_pages_until_short_page() {
        let (url, starts) = paged_server().await;
        let client = paged_client(url);

        let papers = client.fetch_latest(&["cs.CL".to_string()], 10).await.unwrap();
        let ids: Vec<&str> = papers.iter().map(|p| p.source_id.as_str()).collect();
        assert_eq!(ids, vec!["2410.00000", "2410.00001", "2410.00002"]);
        assert_eq!(*starts.lock().unwrap(), vec![0, 2]);
    }

    #[tokio::test]
    async fn fetch_stops_at_max_results() {
        let (url, starts) = paged_server().await;
        let client = paged_client(url);

        let papers = client.fetch_latest(&[], 2).await.unwrap();
        assert_eq!(papers.len(), 2);
        assert_eq!(*starts.lock().unwrap(), vec![0]);
    }

    #[test]
    fn empty_feed() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>x</title></feed>"#;
        assert!(parse_atom_feed(xml).unwrap().is_empty());
    }
}
