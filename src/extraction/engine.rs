//! Applies a compiled spec to a rendered document.

use super::spec::{Attribute, CompiledField, CompiledPagination, CompiledSpec};
use crate::error::ExtractionError;
use crate::fetcher::RenderedDocument;
use crate::item::{FieldValue, Item};
use crate::normalizer::normalize_chain;
use crate::request::CrawlRequest;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, trace, warn};
use url::Url;

/// Page counts above this are treated as a broken indicator.
pub const MAX_SYNTHESIZED_PAGES: u32 = 1_000;

/// A field that was matched but could not be read or normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFailure {
    pub field: String,
    pub reason: String,
}

/// Everything one document yields.
#[derive(Debug, Default)]
pub struct Extraction {
    /// `None` for pages whose spec has no fields, or when every field is empty.
    pub item: Option<Item>,
    pub discovered: Vec<CrawlRequest>,
    pub failures: Vec<FieldFailure>,
}

/// Extracts the item and outgoing requests of `doc`.
///
/// Each field takes the first element its selector matches. Per-field
/// problems never fail the document: the field is recorded in
/// [`Extraction::failures`] and becomes `Null` when required, absent otherwise.
pub fn extract(doc: &RenderedDocument, spec: &CompiledSpec) -> Extraction {
    let html = Html::parse_document(&doc.html);
    let mut extraction = Extraction::default();

    if spec.yields_items() {
        let parent = doc.request.parent_url.as_ref().map(Url::as_str);
        let mut item = Item::new(doc.final_url.as_str(), parent);

        for field in &spec.fields {
            match read_field(&html, field, &doc.final_url) {
                Ok(Some(value)) => item.insert(field.spec.name.as_str(), value),
                Ok(None) => {
                    trace!("`{}` matched nothing on {}", field.spec.name, doc.final_url);
                    if field.spec.required {
                        item.insert(field.spec.name.as_str(), FieldValue::Null);
                    }
                }
                Err(reason) => {
                    debug!(
                        "Field `{}` on {} dropped: {}",
                        field.spec.name, doc.final_url, reason
                    );
                    if field.spec.required {
                        item.insert(field.spec.name.as_str(), FieldValue::Null);
                    }
                    extraction.failures.push(FieldFailure {
                        field: field.spec.name.clone(),
                        reason,
                    });
                }
            }
        }

        if item.has_content() {
            extraction.item = Some(item);
        } else {
            warn!("No field could be read from {}, dropping item", doc.final_url);
        }
    }

    for link in &spec.links {
        for href in html.select(&link.selector).filter_map(|e| e.value().attr("href")) {
            if let Some(url) = resolve_link(&doc.final_url, href) {
                extraction
                    .discovered
                    .push(CrawlRequest::discovered(url, link.kind, &doc.final_url));
            }
        }
    }

    match &spec.pagination {
        Some(CompiledPagination::NextLink(selector)) => {
            if let Some(next) = next_page(&html, selector, doc) {
                extraction.discovered.push(next);
            }
        }
        Some(CompiledPagination::LastPage { selector, segment }) => {
            if doc.request.is_listing_root() {
                extraction
                    .discovered
                    .extend(synthesized_pages(&html, selector, segment, doc));
            }
        }
        None => {}
    }

    extraction
}

fn read_field(
    html: &Html,
    field: &CompiledField,
    base: &Url,
) -> Result<Option<FieldValue>, String> {
    let Some(element) = html.select(&field.selector).next() else {
        return Ok(None);
    };

    let raw = raw_value(element, field, base).map_err(|e| e.to_string())?;
    normalize_chain(&raw, &field.spec.normalizers)
        .map(Some)
        .map_err(|e| e.to_string())
}

fn raw_value(
    element: ElementRef<'_>,
    field: &CompiledField,
    base: &Url,
) -> Result<String, ExtractionError> {
    match field.spec.attribute {
        Attribute::Text => Ok(element.text().collect()),
        Attribute::InnerHtml => Ok(element.inner_html()),
        Attribute::Href | Attribute::Src => {
            let name = field.spec.attribute.attr_name().unwrap_or_default();
            let value = element
                .value()
                .attr(name)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ExtractionError::MissingAttribute {
                    selector: field.spec.selector.clone(),
                    attribute: name.to_string(),
                })?;
            base.join(value)
                .map(String::from)
                .map_err(|_| ExtractionError::InvalidUrl {
                    value: value.to_string(),
                    base: base.to_string(),
                })
        }
    }
}

/// Resolves an `href` to a crawlable URL, dropping anchors and non-HTTP schemes.
fn resolve_link(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let mut url = base.join(href).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

fn next_page(html: &Html, selector: &Selector, doc: &RenderedDocument) -> Option<CrawlRequest> {
    let href = html
        .select(selector)
        .find_map(|e| e.value().attr("href"))?;
    let url = resolve_link(&doc.final_url, href)?;
    if url == doc.final_url {
        return None;
    }
    let number = doc.request.page_number.unwrap_or(1) + 1;
    Some(CrawlRequest::page(
        url,
        doc.request.root_url(),
        &doc.final_url,
        number,
    ))
}

fn synthesized_pages(
    html: &Html,
    selector: &Selector,
    segment: &str,
    doc: &RenderedDocument,
) -> Vec<CrawlRequest> {
    let indicator = html
        .select(selector)
        .next()
        .map(|e| e.text().collect::<String>());
    let Some(last) = indicator.and_then(|text| text.trim().parse::<u32>().ok()) else {
        debug!("No page count on {}, single-page listing", doc.final_url);
        return Vec::new();
    };
    if last > MAX_SYNTHESIZED_PAGES {
        warn!(
            "Implausible page count {} on {}, treating listing as single-page",
            last, doc.final_url
        );
        return Vec::new();
    }

    let root = doc.request.root_url();
    let base_path = root.path().trim_end_matches('/');
    let pages: Vec<CrawlRequest> = (2..=last)
        .map(|n| {
            let mut url = root.clone();
            url.set_path(&format!("{}/{}{}", base_path, segment, n));
            url.set_fragment(None);
            CrawlRequest::page(url, root, root, n)
        })
        .collect();

    debug!("{} has {} pages", root, last);
    pages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{ExtractionSpec, FieldSpec, Pagination};
    use crate::normalizer::Normalizer;
    use crate::request::RequestKind;

    const LISTING: &str = r#"
        <html><body>
          <div class="products">
            <div class="compact-product"><a href="/libro-berserk-1/9788491735663/1">Berserk 1</a></div>
            <div class="compact-product"><a href="https://www.shop.test/libro-monster/9788491461234/2#reviews">Monster</a></div>
            <div class="compact-product"><a href="javascript:void(0)">broken</a></div>
          </div>
          <div class="paginator">
            <button class="btn">1</button><button class="btn">2</button><button class="btn"> 3 </button>
          </div>
        </body></html>"#;

    const DETAIL: &str = r#"
        <html><body>
          <h1 class="titleProducto">
            Berserk 1
          </h1>
          <div class="autor"><h4>Miura, Kentaro</h4></div>
          <div class="info-price"><p>10,40 €</p></div>
          <div class="campo" data-campo="ISBN"><span class="truncate-text">978-84-9173-566-3</span></div>
          <div class="portada"><img src="/imagenes/berserk.jpg"></div>
          <div class="resumen-content"><p>Guts, <b>el espadachín negro</b>.</p></div>
        </body></html>"#;

    fn root() -> CrawlRequest {
        CrawlRequest::listing(Url::parse("https://www.shop.test/libros/comics/411000000").unwrap())
    }

    fn document(request: CrawlRequest, html: &str) -> RenderedDocument {
        let final_url = request.url.clone();
        RenderedDocument::new(request, final_url, 200, html.to_string())
    }

    fn listing_spec() -> CompiledSpec {
        ExtractionSpec::default()
            .follow("div.compact-product a", RequestKind::Detail)
            .paginate(Pagination::LastPage {
                selector: "div.paginator button.btn:last-child".into(),
                segment: "p".into(),
            })
            .compile()
            .unwrap()
    }

    fn detail_spec() -> CompiledSpec {
        ExtractionSpec::default()
            .field(
                FieldSpec::new("title", ".titleProducto")
                    .required()
                    .normalizers([Normalizer::StripMarkup, Normalizer::CollapseWhitespace]),
            )
            .field(
                FieldSpec::new("author", ".autor h4").normalizers([Normalizer::ReorderPersonName]),
            )
            .field(FieldSpec::new("price", ".info-price p").normalizers([Normalizer::ParseCurrency]))
            .field(FieldSpec::new("isbn", ".campo[data-campo='ISBN'] span").normalizers([
                Normalizer::CollapseWhitespace,
                Normalizer::StripDashes,
            ]))
            .field(FieldSpec::new("publisher", ".campo[data-campo='Editorial'] span"))
            .field(
                FieldSpec::new("publication_date", ".campo[data-campo='Fecha'] span").required(),
            )
            .field(FieldSpec::new("image", "div.portada img").attribute(Attribute::Src))
            .field(
                FieldSpec::new("summary", ".resumen-content")
                    .attribute(Attribute::InnerHtml)
                    .normalizers([Normalizer::StripMarkup, Normalizer::CollapseWhitespace]),
            )
            .compile()
            .unwrap()
    }

    #[test]
    fn listing_yields_detail_links_and_synthesized_pages() {
        let extraction = extract(&document(root(), LISTING), &listing_spec());

        assert!(extraction.item.is_none());
        let urls: Vec<&str> = extraction.discovered.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://www.shop.test/libro-berserk-1/9788491735663/1",
                "https://www.shop.test/libro-monster/9788491461234/2",
                "https://www.shop.test/libros/comics/411000000/p2",
                "https://www.shop.test/libros/comics/411000000/p3",
            ]
        );

        let detail = &extraction.discovered[0];
        assert_eq!(detail.kind, RequestKind::Detail);
        assert_eq!(detail.parent_url.as_ref(), Some(&root().url));

        let page = &extraction.discovered[3];
        assert_eq!(page.kind, RequestKind::Listing);
        assert_eq!(page.page_number, Some(3));
        assert_eq!(page.parent_url.as_ref(), Some(&root().url));
        assert_eq!(page.base_url.as_ref(), Some(&root().url));
    }

    #[test]
    fn synthesized_pages_do_not_recurse() {
        let page_two = CrawlRequest::page(
            Url::parse("https://www.shop.test/libros/comics/411000000/p2").unwrap(),
            &root().url,
            &root().url,
            2,
        );
        let extraction = extract(&document(page_two, LISTING), &listing_spec());

        assert_eq!(extraction.discovered.len(), 2);
        assert!(extraction
            .discovered
            .iter()
            .all(|r| r.kind == RequestKind::Detail));
    }

    #[test]
    fn missing_or_garbled_page_count_means_single_page() {
        let no_paginator = LISTING.replace("paginator", "elsewhere");
        let garbled = LISTING.replace(" 3 ", "siguiente");
        let implausible = LISTING.replace(" 3 ", " 4000000000 ");

        for html in [no_paginator, garbled, implausible] {
            let extraction = extract(&document(root(), &html), &listing_spec());
            assert_eq!(extraction.discovered.len(), 2);
        }
    }

    #[test]
    fn next_link_pagination_follows_until_absent() {
        let spec = ExtractionSpec::default()
            .paginate(Pagination::NextLink {
                selector: "li.next > a".into(),
            })
            .compile()
            .unwrap();
        let html = r#"<ul><li class="next"><a href="page-2.html">next</a></li></ul>"#;

        let first = extract(&document(root(), html), &spec);
        assert_eq!(first.discovered.len(), 1);
        let next = &first.discovered[0];
        assert_eq!(next.url.as_str(), "https://www.shop.test/libros/comics/page-2.html");
        assert_eq!(next.page_number, Some(2));
        assert_eq!(next.parent_url.as_ref(), Some(&root().url));

        let last = extract(&document(next.clone(), "<ul></ul>"), &spec);
        assert!(last.discovered.is_empty());
    }

    #[test]
    fn detail_page_yields_normalized_item() {
        let request = CrawlRequest::detail(
            Url::parse("https://www.shop.test/libro-berserk-1/9788491735663/1").unwrap(),
            &root().url,
        );
        let extraction = extract(&document(request, DETAIL), &detail_spec());
        let item = extraction.item.expect("item");

        assert_eq!(
            item.url(),
            Some("https://www.shop.test/libro-berserk-1/9788491735663/1")
        );
        assert_eq!(
            item.get(Item::PARENT_URL),
            Some(&FieldValue::from("https://www.shop.test/libros/comics/411000000"))
        );
        assert_eq!(item.get("title"), Some(&FieldValue::from("Berserk 1")));
        assert_eq!(item.get("author"), Some(&FieldValue::from("Kentaro Miura")));
        assert_eq!(item.get("price"), Some(&FieldValue::Number(10.40)));
        assert_eq!(item.get("isbn"), Some(&FieldValue::from("9788491735663")));
        assert_eq!(
            item.get("image"),
            Some(&FieldValue::from("https://www.shop.test/imagenes/berserk.jpg"))
        );
        assert_eq!(
            item.get("summary"),
            Some(&FieldValue::from("Guts, el espadachín negro."))
        );
        // optional and missing
        assert!(!item.contains("publisher"));
        // required and missing
        assert_eq!(item.get("publication_date"), Some(&FieldValue::Null));
        assert!(extraction.failures.is_empty());
    }

    #[test]
    fn field_failures_do_not_fail_the_item() {
        let html = DETAIL
            .replace("10,40 €", "Agotado")
            .replace(r#"<img src="/imagenes/berserk.jpg">"#, "<img>");
        let request = CrawlRequest::detail(
            Url::parse("https://www.shop.test/libro-berserk-1/9788491735663/1").unwrap(),
            &root().url,
        );
        let extraction = extract(&document(request, &html), &detail_spec());
        let item = extraction.item.expect("item");

        assert!(!item.contains("price"));
        assert!(!item.contains("image"));
        assert_eq!(item.get("title"), Some(&FieldValue::from("Berserk 1")));

        let failed: Vec<&str> = extraction.failures.iter().map(|f| f.field.as_str()).collect();
        assert_eq!(failed, vec!["price", "image"]);
    }

    #[test]
    fn item_without_any_content_is_dropped() {
        let request = CrawlRequest::detail(
            Url::parse("https://www.shop.test/libro-vacio/1").unwrap(),
            &root().url,
        );
        let extraction = extract(
            &document(request, "<html><body>Página no encontrada</body></html>"),
            &detail_spec(),
        );
        assert!(extraction.item.is_none());
    }
}
