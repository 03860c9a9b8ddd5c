//! # Extraction Module
//!
//! Turns rendered documents into items and follow-up requests.
//!
//! ## Overview
//!
//! Extraction is driven by data, not code: each page kind of a site is
//! described by an [`ExtractionSpec`] (field selectors, link rules,
//! pagination), compiled once into a [`CompiledSpec`] and applied with
//! [`extract`]. Extraction is synchronous and pure; it never touches the
//! network or the frontier.

mod engine;
mod spec;

pub use engine::{extract, Extraction, FieldFailure};
pub use spec::{
    Attribute, CompiledField, CompiledLink, CompiledPagination, CompiledSpec, ExtractionSpec,
    FieldSpec, LinkRule, Pagination,
};
