// Book search against the Google Books volumes endpoint

use crate::trackers::SavedBook;
use eyre::{Context, Result, eyre};
use reqwest::Url;
use reqwest::blocking::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BOOKS_URL: &str = "https://www.googleapis.com/books/v1/volumes";
pub const MAX_RESULTS_LIMIT: u8 = 40;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SearchOrder {
    #[default]
    Relevance,
    Newest,
}

impl SearchOrder {
    fn as_param(self) -> &'static str {
        match self {
            SearchOrder::Relevance => "relevance",
            SearchOrder::Newest => "newest",
        }
    }
}

/// Optional narrowing applied to a search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchFilters {
    /// Two-letter language code (`langRestrict`)
    pub language: Option<String>,
    pub subject: Option<String>,
    pub author: Option<String>,
    pub order: SearchOrder,
    /// Clamped to 1..=40
    pub max_results: u8,
}

impl Default for SearchFilters {
    fn default() -> Self {
        Self {
            language: None,
            subject: None,
            author: None,
            order: SearchOrder::Relevance,
            max_results: 20,
        }
    }
}

/// Read-only client for the public volumes API
///
/// Search failures are not errors to the caller: they are logged and come
/// back as an empty result list.
pub struct BookSearch {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl BookSearch {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).context(format!("Invalid books URL: {}", base_url))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    /// Request URL for a query; `None` when the query is blank
    pub fn request_url(&self, query: &str, filters: &SearchFilters) -> Option<Url> {
        let q = build_query(query, filters)?;
        let mut url = self.base_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("q", &q);
            pairs.append_pair(
                "maxResults",
                &filters.max_results.clamp(1, MAX_RESULTS_LIMIT).to_string(),
            );
            pairs.append_pair("orderBy", filters.order.as_param());
            if let Some(lang) = non_blank(&filters.language) {
                pairs.append_pair("langRestrict", lang);
            }
            if let Some(key) = &self.api_key {
                pairs.append_pair("key", key);
            }
        }
        Some(url)
    }

    pub fn search(&self, query: &str, filters: &SearchFilters) -> Vec<SavedBook> {
        let Some(url) = self.request_url(query, filters) else {
            return Vec::new();
        };
        match self.fetch(url) {
            Ok(body) => {
                let books = parse_volumes(&body);
                debug!(query, count = books.len(), "Book search complete");
                books
            }
            Err(e) => {
                warn!(query, error = %format!("{:#}", e), "Book search failed");
                Vec::new()
            }
        }
    }

    fn fetch(&self, url: Url) -> Result<Value> {
        let response = self.client.get(url).send().context("Request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(eyre!("HTTP {}: {}", status.as_u16(), body.trim()));
        }
        response.json::<Value>().context("Failed to decode response body")
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Search expression with `inauthor:`/`subject:` qualifiers appended
pub fn build_query(query: &str, filters: &SearchFilters) -> Option<String> {
    let query = query.trim();
    if query.is_empty() {
        return None;
    }
    let mut q = query.to_string();
    if let Some(author) = non_blank(&filters.author) {
        q.push_str(&format!(" inauthor:{}", author));
    }
    if let Some(subject) = non_blank(&filters.subject) {
        q.push_str(&format!(" subject:{}", subject));
    }
    Some(q)
}

/// Map a volumes response to saved-book shapes
///
/// Volumes without a title are dropped. Thumbnails are upgraded to https.
pub fn parse_volumes(body: &Value) -> Vec<SavedBook> {
    let Some(items) = body.get("items").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let info = item.get("volumeInfo")?;
            let title = info.get("title")?.as_str()?.trim();
            if title.is_empty() {
                return None;
            }
            Some(SavedBook {
                title: title.to_string(),
                authors: strings(info.get("authors")),
                language: info
                    .get("language")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                categories: strings(info.get("categories")),
                image: info
                    .pointer("/imageLinks/thumbnail")
                    .or_else(|| info.pointer("/imageLinks/smallThumbnail"))
                    .and_then(Value::as_str)
                    .map(secure_url),
            })
        })
        .collect()
}

fn strings(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

fn secure_url(url: &str) -> String {
    match url.strip_prefix("http://") {
        Some(rest) => format!("https://{}", rest),
        None => url.to_string(),
    }
}
