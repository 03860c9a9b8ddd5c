//! Declarative extraction specs.
//!
//! An [`ExtractionSpec`] describes one page kind on one site: which fields to
//! read, which links to follow and how pagination works. Specs are plain data
//! (they deserialize from a site profile) and are compiled once, at startup,
//! into a [`CompiledSpec`] holding parsed selectors.

use crate::error::CrawlError;
use crate::normalizer::Normalizer;
use crate::request::RequestKind;
use scraper::Selector;
use serde::{Deserialize, Serialize};

/// Where a field's raw value is read from on the matched element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    /// The element's text content.
    #[default]
    Text,
    /// The element's inner markup, for chains starting with `strip_markup`.
    InnerHtml,
    /// The `href` attribute, resolved against the page URL.
    Href,
    /// The `src` attribute, resolved against the page URL.
    Src,
}

impl Attribute {
    pub(crate) fn attr_name(&self) -> Option<&'static str> {
        match self {
            Attribute::Href => Some("href"),
            Attribute::Src => Some("src"),
            Attribute::Text | Attribute::InnerHtml => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub selector: String,
    #[serde(default)]
    pub attribute: Attribute,
    /// Required fields are kept as null when missing instead of being left out.
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub normalizers: Vec<Normalizer>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selector: selector.into(),
            attribute: Attribute::Text,
            required: false,
            normalizers: Vec::new(),
        }
    }

    pub fn attribute(mut self, attribute: Attribute) -> Self {
        self.attribute = attribute;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn normalizers(mut self, chain: impl IntoIterator<Item = Normalizer>) -> Self {
        self.normalizers = chain.into_iter().collect();
        self
    }
}

/// Follow every `href` matched by `selector` as a request of `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRule {
    pub selector: String,
    pub kind: RequestKind,
}

fn default_page_segment() -> String {
    "p".to_string()
}

/// How a listing branch reaches its further pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Pagination {
    /// Follow the `href` of the first element matching `selector`. The branch
    /// ends on the first page without one.
    NextLink { selector: String },
    /// Read the last page number from the text of `selector` on the listing
    /// root and synthesize `<root>/<segment><n>` for every later page.
    LastPage {
        selector: String,
        #[serde(default = "default_page_segment")]
        segment: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSpec {
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub links: Vec<LinkRule>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

impl ExtractionSpec {
    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn follow(mut self, selector: impl Into<String>, kind: RequestKind) -> Self {
        self.links.push(LinkRule {
            selector: selector.into(),
            kind,
        });
        self
    }

    pub fn paginate(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    /// Parses every selector. A malformed selector is a configuration error.
    pub fn compile(&self) -> Result<CompiledSpec, CrawlError> {
        let fields = self
            .fields
            .iter()
            .map(|field| {
                Ok(CompiledField {
                    selector: parse_selector(&field.name, &field.selector)?,
                    spec: field.clone(),
                })
            })
            .collect::<Result<Vec<_>, CrawlError>>()?;

        let links = self
            .links
            .iter()
            .map(|rule| {
                Ok(CompiledLink {
                    selector: parse_selector("links", &rule.selector)?,
                    kind: rule.kind,
                })
            })
            .collect::<Result<Vec<_>, CrawlError>>()?;

        let pagination = match &self.pagination {
            None => None,
            Some(Pagination::NextLink { selector }) => Some(CompiledPagination::NextLink(
                parse_selector("pagination", selector)?,
            )),
            Some(Pagination::LastPage { selector, segment }) => {
                Some(CompiledPagination::LastPage {
                    selector: parse_selector("pagination", selector)?,
                    segment: segment.clone(),
                })
            }
        };

        Ok(CompiledSpec {
            fields,
            links,
            pagination,
        })
    }
}

fn parse_selector(field: &str, selector: &str) -> Result<Selector, CrawlError> {
    Selector::parse(selector).map_err(|e| CrawlError::InvalidSelector {
        field: field.to_string(),
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

#[derive(Debug)]
pub struct CompiledField {
    pub spec: FieldSpec,
    pub selector: Selector,
}

#[derive(Debug)]
pub struct CompiledLink {
    pub selector: Selector,
    pub kind: RequestKind,
}

#[derive(Debug)]
pub enum CompiledPagination {
    NextLink(Selector),
    LastPage { selector: Selector, segment: String },
}

/// An [`ExtractionSpec`] with its selectors parsed.
#[derive(Debug)]
pub struct CompiledSpec {
    pub fields: Vec<CompiledField>,
    pub links: Vec<CompiledLink>,
    pub pagination: Option<CompiledPagination>,
}

impl CompiledSpec {
    /// Whether pages of this kind produce items.
    pub fn yields_items(&self) -> bool {
        !self.fields.is_empty()
    }

    /// Field names in declaration order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.spec.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_selector_is_a_configuration_error() {
        let spec = ExtractionSpec::default().field(FieldSpec::new("title", "div[[["));
        match spec.compile() {
            Err(CrawlError::InvalidSelector { field, .. }) => assert_eq!(field, "title"),
            other => panic!("expected InvalidSelector, got {:?}", other),
        }
    }

    #[test]
    fn deserializes_with_defaults() {
        let spec: ExtractionSpec = serde_json::from_str(
            r#"{
                "fields": [
                    {"name": "image", "selector": "div.portada img", "attribute": "src"},
                    {"name": "title", "selector": ".titleProducto", "required": true,
                     "normalizers": ["strip_markup", "collapse_whitespace"]}
                ],
                "pagination": {"strategy": "last_page", "selector": "div.paginator button.btn:last-child"}
            }"#,
        )
        .unwrap();

        assert_eq!(spec.fields[0].attribute, Attribute::Src);
        assert!(!spec.fields[0].required);
        assert!(spec.fields[1].required);
        assert_eq!(
            spec.pagination,
            Some(Pagination::LastPage {
                selector: "div.paginator button.btn:last-child".into(),
                segment: "p".into()
            })
        );
        assert!(spec.compile().unwrap().yields_items());
    }
}
