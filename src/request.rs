//! Crawl requests and URL canonicalization.
//!
//! A [`CrawlRequest`] is identified by the canonical form of its URL, not by
//! the request value itself: two requests discovered from different pages
//! for the same product collapse into one frontier entry.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// What a page is expected to contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// A catalog page listing products and pagination controls.
    Listing,
    /// A single product page.
    Detail,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Listing => f.write_str("listing"),
            RequestKind::Detail => f.write_str("detail"),
        }
    }
}

/// A URL waiting to be fetched, with enough context to attribute the
/// resulting item or failure back to where it was found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlRequest {
    pub url: Url,
    pub kind: RequestKind,
    /// The page this request was discovered on.
    pub parent_url: Option<Url>,
    /// Set for synthesized or followed pagination pages. `None` marks a
    /// listing root.
    pub page_number: Option<u32>,
    /// The listing root this request's branch started from.
    pub base_url: Option<Url>,
}

impl CrawlRequest {
    /// Creates a listing root request, as used for seeds.
    pub fn listing(mut url: Url) -> Self {
        url.set_fragment(None);
        Self {
            base_url: Some(url.clone()),
            url,
            kind: RequestKind::Listing,
            parent_url: None,
            page_number: None,
        }
    }

    /// Creates a detail request discovered on `parent`.
    pub fn detail(url: Url, parent: &Url) -> Self {
        Self {
            url,
            kind: RequestKind::Detail,
            parent_url: Some(parent.clone()),
            page_number: None,
            base_url: None,
        }
    }

    /// Creates a request of any kind discovered on `parent`.
    pub fn discovered(url: Url, kind: RequestKind, parent: &Url) -> Self {
        match kind {
            RequestKind::Detail => Self::detail(url, parent),
            RequestKind::Listing => Self {
                url,
                kind,
                parent_url: Some(parent.clone()),
                page_number: None,
                base_url: None,
            },
        }
    }

    /// Creates a pagination request belonging to the listing root `root`.
    pub fn page(url: Url, root: &Url, parent: &Url, page_number: u32) -> Self {
        Self {
            url,
            kind: RequestKind::Listing,
            parent_url: Some(parent.clone()),
            page_number: Some(page_number),
            base_url: Some(root.clone()),
        }
    }

    /// Whether this request is the first page of a listing branch.
    pub fn is_listing_root(&self) -> bool {
        self.kind == RequestKind::Listing && self.page_number.is_none()
    }

    /// The listing root of this request's branch, falling back to its own URL.
    pub fn root_url(&self) -> &Url {
        self.base_url.as_ref().unwrap_or(&self.url)
    }

    /// The identity used for deduplication.
    pub fn fingerprint(&self) -> String {
        canonicalize(&self.url)
    }
}

/// Normalizes a URL for identity comparison: scheme, host, explicit port,
/// path and query pairs sorted by key then value. The fragment is dropped.
///
/// `Url` already lowercases the scheme and host and elides default ports.
pub fn canonicalize(url: &Url) -> String {
    let mut canonical = String::with_capacity(url.as_str().len());
    canonical.push_str(url.scheme());
    canonical.push_str("://");
    if let Some(host) = url.host_str() {
        canonical.push_str(host);
    }
    if let Some(port) = url.port() {
        canonical.push(':');
        canonical.push_str(&port.to_string());
    }
    canonical.push_str(url.path());

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if !pairs.is_empty() {
        pairs.sort();
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .finish();
        canonical.push('?');
        canonical.push_str(&query);
    }
    canonical
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn canonical_form_ignores_fragment_and_query_order() {
        let a = canonicalize(&url("https://Shop.example.com/libros/1?b=2&a=1#top"));
        let b = canonicalize(&url("https://shop.example.com/libros/1?a=1&b=2"));
        assert_eq!(a, b);
        assert_eq!(a, "https://shop.example.com/libros/1?a=1&b=2");
    }

    #[test]
    fn canonical_form_keeps_non_default_port_and_path_case() {
        assert_eq!(
            canonicalize(&url("http://example.com:8080/Libros")),
            "http://example.com:8080/Libros"
        );
        assert_eq!(
            canonicalize(&url("https://example.com:443/")),
            "https://example.com/"
        );
    }

    #[test]
    fn listing_seed_is_its_own_root() {
        let request = CrawlRequest::listing(url("https://example.com/comics/411000000#x"));
        assert!(request.is_listing_root());
        assert_eq!(request.root_url().as_str(), "https://example.com/comics/411000000");
        assert_eq!(request.url.fragment(), None);
    }

    #[test]
    fn pages_point_back_to_their_root() {
        let root = url("https://example.com/comics");
        let page = CrawlRequest::page(url("https://example.com/comics/p2"), &root, &root, 2);
        assert!(!page.is_listing_root());
        assert_eq!(page.root_url(), &root);
        assert_eq!(page.parent_url.as_ref(), Some(&root));
    }
}
