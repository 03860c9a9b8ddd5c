//! # Site Module
//!
//! Describes one catalog site: where to start, how to fetch, what to extract.
//!
//! ## Overview
//!
//! A [`SiteProfile`] is plain data. It can be loaded from JSON or taken from a
//! built-in preset, and is compiled once into a [`CompiledSite`] before the
//! crawl starts. Compilation is where malformed selectors and seed URLs are
//! caught, so a bad profile fails the run before any request is sent.
//!
//! ## Example
//!
//! ```json
//! {
//!   "name": "example-books",
//!   "start_urls": ["https://books.example/catalogue/"],
//!   "fetch_mode": {"mode": "static"},
//!   "listing": {
//!     "links": [{"selector": "article.product h3 a", "kind": "detail"}],
//!     "pagination": {"strategy": "next_link", "selector": "li.next > a"}
//!   },
//!   "detail": {
//!     "fields": [
//!       {"name": "title", "selector": "h1", "required": true},
//!       {"name": "price", "selector": "p.price", "normalizers": ["parse_currency"]}
//!     ]
//!   }
//! }
//! ```

use crate::error::CrawlError;
use crate::extraction::{Attribute, CompiledSpec, ExtractionSpec, FieldSpec, Pagination};
use crate::fetcher::{InteractionStep, RenderOptions};
use crate::item::Item;
use crate::normalizer::Normalizer;
use crate::request::{CrawlRequest, RequestKind};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// How pages of a site are acquired. Chosen per site, never per request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FetchMode {
    #[default]
    Static,
    Rendered(RenderOptions),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteProfile {
    pub name: String,
    pub start_urls: Vec<String>,
    #[serde(default)]
    pub fetch_mode: FetchMode,
    #[serde(default)]
    pub listing: ExtractionSpec,
    #[serde(default)]
    pub detail: ExtractionSpec,
}

impl SiteProfile {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CrawlError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, CrawlError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Parses seeds and selectors.
    pub fn compile(&self) -> Result<CompiledSite, CrawlError> {
        if self.start_urls.is_empty() {
            return Err(CrawlError::Configuration(format!(
                "site `{}` has no start URLs",
                self.name
            )));
        }
        let seeds = self
            .start_urls
            .iter()
            .map(|raw| Url::parse(raw).map_err(|e| CrawlError::InvalidUrl(raw.clone(), e)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CompiledSite {
            name: self.name.clone(),
            seeds,
            fetch_mode: self.fetch_mode.clone(),
            listing: self.listing.compile()?,
            detail: self.detail.compile()?,
        })
    }

    /// The Casa del Libro manga, comics, art and foreign-language catalogs.
    pub fn casa_del_libro() -> Self {
        const BASE: &str = "https://www.casadellibro.com/libros";
        let start_urls = [
            "comics-y-manga-infantil-y-juvenil/manga-juvenil/shonen/412004002",
            "comics/manga/seinen/411006004",
            "comics-y-manga-infantil-y-juvenil/manga-juvenil/shojo/412004001",
            "arte/101000000",
            "comics/411000000",
            "literatura-en-otros-idiomas/124000000",
        ]
        .iter()
        .map(|path| format!("{}/{}", BASE, path))
        .collect();

        let text = || [Normalizer::StripMarkup, Normalizer::CollapseWhitespace];
        let campo = |label: &str| format!(".campo[data-campo='{}'] span.truncate-text", label);

        let detail = ExtractionSpec::default()
            .field(FieldSpec::new("title", ".titleProducto").required().normalizers(text()))
            .field(FieldSpec::new("author", ".autor h4").normalizers([
                Normalizer::StripMarkup,
                Normalizer::CollapseWhitespace,
                Normalizer::ReorderPersonName,
            ]))
            .field(FieldSpec::new("price", ".info-price p").normalizers([
                Normalizer::StripMarkup,
                Normalizer::ParseCurrency,
            ]))
            .field(FieldSpec::new("isbn", campo("ISBN")).normalizers([
                Normalizer::StripMarkup,
                Normalizer::CollapseWhitespace,
                Normalizer::StripDashes,
            ]))
            .field(FieldSpec::new("publisher", campo("Editorial")).normalizers(text()))
            .field(
                FieldSpec::new("publication_date", campo("Fecha de lanzamiento"))
                    .normalizers(text()),
            )
            .field(FieldSpec::new("image", "div.portada img").attribute(Attribute::Src))
            .field(
                FieldSpec::new("summary", ".resumen-content")
                    .attribute(Attribute::InnerHtml)
                    .normalizers(text()),
            );

        let listing = ExtractionSpec::default()
            .follow("div.compact-product a", RequestKind::Detail)
            .paginate(Pagination::LastPage {
                selector: "div.paginator button.btn:last-child".into(),
                segment: "p".into(),
            });

        let render = RenderOptions {
            listing_steps: vec![
                InteractionStep::ScrollToBottom,
                InteractionStep::WaitForSelector {
                    selector: "div.products".into(),
                    timeout_ms: 30_000,
                },
            ],
            detail_steps: vec![InteractionStep::ScrollToBottom],
            ..RenderOptions::default()
        };

        Self {
            name: "casa_del_libro".into(),
            start_urls,
            fetch_mode: FetchMode::Rendered(render),
            listing,
            detail,
        }
    }
}

/// A [`SiteProfile`] with parsed seeds and selectors.
#[derive(Debug)]
pub struct CompiledSite {
    pub name: String,
    pub seeds: Vec<Url>,
    pub fetch_mode: FetchMode,
    pub listing: CompiledSpec,
    pub detail: CompiledSpec,
}

impl CompiledSite {
    pub fn spec_for(&self, kind: RequestKind) -> &CompiledSpec {
        match kind {
            RequestKind::Listing => &self.listing,
            RequestKind::Detail => &self.detail,
        }
    }

    /// Listing-root requests for every seed, in profile order.
    pub fn start_requests(&self) -> Vec<CrawlRequest> {
        self.seeds.iter().cloned().map(CrawlRequest::listing).collect()
    }

    /// Output columns: the bookkeeping URLs, then every item field in
    /// declaration order.
    pub fn columns(&self) -> Vec<String> {
        let mut columns = vec![Item::URL.to_string(), Item::PARENT_URL.to_string()];
        for spec in [&self.listing, &self.detail] {
            for name in spec.field_names() {
                if !columns.iter().any(|c| c == name) {
                    columns.push(name.to_string());
                }
            }
        }
        columns
    }
}
