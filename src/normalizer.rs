//! Field normalizers.
//!
//! A field's raw text passes through an ordered chain of [`Normalizer`]s,
//! left to right. Every normalizer is total over [`FieldValue`]: `Null`
//! passes through, numbers pass through text operations, and running a
//! normalizer on its own output changes nothing. A failing step is reported
//! as a [`NormalizationError`] and the caller drops that single field.

use crate::error::NormalizationError;
use crate::item::FieldValue;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::LazyLock;

static TAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag pattern is valid"));

/// Currency affixes may carry a short code such as `EUR` or `kn`, nothing wordier.
const MAX_AFFIX_LETTERS: usize = 3;

/// One step of a normalization chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalizer {
    /// Removes HTML tags, keeping the text between them.
    StripMarkup,
    /// Trims and removes embedded `\n` and `\r`. Inner spaces are kept.
    CollapseWhitespace,
    /// Trims surrounding whitespace.
    Trim,
    /// Re-decodes text that was UTF-8 read as Windows-1252.
    RepairEncoding,
    /// Parses a localized price such as `12,50 €` into a number.
    ParseCurrency,
    /// Removes hyphens, as in ISBNs.
    StripDashes,
    /// Removes a leading id token such as `book_`.
    StripPrefix(String),
    /// Turns `Last, First` into `First Last`, keeping only the first of
    /// several `/`-separated names.
    ReorderPersonName,
}

impl Normalizer {
    /// Applies this step to a value.
    pub fn apply(&self, value: FieldValue) -> Result<FieldValue, NormalizationError> {
        let text = match value {
            FieldValue::Null => return Ok(FieldValue::Null),
            FieldValue::Number(n) => return Ok(FieldValue::Number(n)),
            FieldValue::Text(text) => text,
        };

        let normalized = match self {
            Normalizer::StripMarkup => strip_markup(&text),
            Normalizer::CollapseWhitespace => collapse_whitespace(&text),
            Normalizer::Trim => text.trim().to_string(),
            Normalizer::RepairEncoding => repair_encoding(&text).into_owned(),
            Normalizer::ParseCurrency => return parse_currency(&text).map(FieldValue::Number),
            Normalizer::StripDashes => strip_dashes(&text),
            Normalizer::StripPrefix(prefix) => strip_prefix(&text, prefix),
            Normalizer::ReorderPersonName => reorder_person_name(&text),
        };
        Ok(FieldValue::Text(normalized))
    }
}

/// Runs `raw` through `chain`. Text that ends up empty is treated as missing.
pub fn normalize_chain(
    raw: &str,
    chain: &[Normalizer],
) -> Result<FieldValue, NormalizationError> {
    let value = chain
        .iter()
        .try_fold(FieldValue::Text(raw.to_string()), |value, step| step.apply(value))?;

    match value {
        FieldValue::Text(ref text) if text.is_empty() => Err(NormalizationError::Empty),
        other => Ok(other),
    }
}

pub fn strip_markup(text: &str) -> String {
    TAG_PATTERN.replace_all(text, "").into_owned()
}

pub fn collapse_whitespace(text: &str) -> String {
    text.trim()
        .chars()
        .filter(|c| *c != '\n' && *c != '\r')
        .collect()
}

pub fn strip_dashes(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '-' | '\u{2010}' | '\u{2011}'))
        .collect()
}

pub fn strip_prefix(text: &str, prefix: &str) -> String {
    if prefix.is_empty() {
        return text.to_string();
    }
    text.trim_start_matches(prefix).to_string()
}

pub fn reorder_person_name(text: &str) -> String {
    let first = text.split('/').next().unwrap_or_default().trim();
    let mut parts = first.split(',');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(last), Some(given), None) if !last.trim().is_empty() && !given.trim().is_empty() => {
            format!("{} {}", given.trim(), last.trim())
        }
        _ => first.to_string(),
    }
}

/// Parses a price written with a currency symbol and either `.` or `,` as
/// the decimal separator.
pub fn parse_currency(raw: &str) -> Result<f64, NormalizationError> {
    let not_numeric = || NormalizationError::NotNumeric(raw.trim().to_string());

    let repaired = repair_encoding(raw);
    let text = repaired.replace(&['\u{a0}', '\u{202f}'][..], " ");

    let start = text.find(|c: char| c.is_ascii_digit()).ok_or_else(not_numeric)?;
    let end = text
        .rfind(|c: char| c.is_ascii_digit())
        .map(|i| i + 1)
        .ok_or_else(not_numeric)?;
    let (prefix, core, suffix) = (&text[..start], &text[start..end], &text[end..]);

    let affix_letters = prefix
        .chars()
        .chain(suffix.chars())
        .filter(|c| c.is_alphabetic())
        .count();
    if affix_letters > MAX_AFFIX_LETTERS {
        return Err(not_numeric());
    }
    if core
        .chars()
        .any(|c| !(c.is_ascii_digit() || matches!(c, '.' | ',' | ' ' | '\'')))
    {
        return Err(not_numeric());
    }

    let digits: String = core.chars().filter(|c| !matches!(c, ' ' | '\'')).collect();
    let canonical = match (digits.rfind('.'), digits.rfind(',')) {
        (Some(dot), Some(comma)) => {
            let (decimal, grouping) = if dot > comma { ('.', ',') } else { (',', '.') };
            digits.replace(grouping, "").replace(decimal, ".")
        }
        (None, Some(_)) if digits.matches(',').count() == 1 => digits.replace(',', "."),
        (None, Some(_)) => digits.replace(',', ""),
        (Some(_), None) if digits.matches('.').count() > 1 => digits.replace('.', ""),
        (Some(dot), None) if is_thousands_group(&digits, dot) => digits.replace('.', ""),
        _ => digits,
    };

    let amount: f64 = canonical.parse().map_err(|_| not_numeric())?;
    if prefix.trim_end().ends_with('-') {
        Ok(-amount)
    } else {
        Ok(amount)
    }
}

/// A lone dot followed by exactly three digits groups thousands (`1.234 €`),
/// unless the integer part is zero (`0.125`).
fn is_thousands_group(digits: &str, dot: usize) -> bool {
    let (int_part, frac_part) = (&digits[..dot], &digits[dot + 1..]);
    frac_part.len() == 3
        && (1..=3).contains(&int_part.len())
        && !int_part.chars().all(|c| c == '0')
}

/// Undoes the classic mojibake where UTF-8 bytes were decoded as
/// Windows-1252 (or Latin-1), e.g. `â‚¬` back to `€`. Text that does not
/// round-trip to valid UTF-8 is returned untouched.
pub fn repair_encoding(text: &str) -> Cow<'_, str> {
    if text.is_ascii() {
        return Cow::Borrowed(text);
    }

    let mut bytes = Vec::with_capacity(text.len());
    for c in text.chars() {
        match windows_1252_byte(c) {
            Some(b) => bytes.push(b),
            None => return Cow::Borrowed(text),
        }
    }

    match String::from_utf8(bytes) {
        Ok(repaired) if repaired != text => Cow::Owned(repaired),
        _ => Cow::Borrowed(text),
    }
}

fn windows_1252_byte(c: char) -> Option<u8> {
    let code = c as u32;
    if code <= 0xff {
        return Some(code as u8);
    }
    let byte = match c {
        '\u{20ac}' => 0x80,
        '\u{201a}' => 0x82,
        '\u{0192}' => 0x83,
        '\u{201e}' => 0x84,
        '\u{2026}' => 0x85,
        '\u{2020}' => 0x86,
        '\u{2021}' => 0x87,
        '\u{02c6}' => 0x88,
        '\u{2030}' => 0x89,
        '\u{0160}' => 0x8a,
        '\u{2039}' => 0x8b,
        '\u{0152}' => 0x8c,
        '\u{017d}' => 0x8e,
        '\u{2018}' => 0x91,
        '\u{2019}' => 0x92,
        '\u{201c}' => 0x93,
        '\u{201d}' => 0x94,
        '\u{2022}' => 0x95,
        '\u{2013}' => 0x96,
        '\u{2014}' => 0x97,
        '\u{02dc}' => 0x98,
        '\u{2122}' => 0x99,
        '\u{0161}' => 0x9a,
        '\u{203a}' => 0x9b,
        '\u{0153}' => 0x9c,
        '\u{017e}' => 0x9e,
        '\u{0178}' => 0x9f,
        _ => return None,
    };
    Some(byte)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_euro_prices_with_comma_decimals() {
        assert_eq!(parse_currency("12,50 €"), Ok(12.5));
        assert_eq!(parse_currency("1.234,56\u{a0}€"), Ok(1234.56));
        assert_eq!(parse_currency("$1,234.56"), Ok(1234.56));
        assert_eq!(parse_currency("EUR 7"), Ok(7.0));
        assert_eq!(parse_currency("-3,00 €"), Ok(-3.0));
    }

    #[test]
    fn lone_dot_before_three_digits_groups_thousands() {
        assert_eq!(parse_currency("1.234 €"), Ok(1234.0));
        assert_eq!(parse_currency("1.234.567 €"), Ok(1_234_567.0));
        assert_eq!(parse_currency("12.99 €"), Ok(12.99));
        assert_eq!(parse_currency("0.125"), Ok(0.125));
    }

    #[test]
    fn repairs_misdecoded_currency_symbols_before_parsing() {
        assert_eq!(repair_encoding("12,50 â‚¬"), "12,50 €");
        assert_eq!(parse_currency("12,50 â‚¬"), Ok(12.5));
        assert_eq!(repair_encoding("García"), "García");
    }

    #[test]
    fn rejects_non_numeric_prices() {
        assert_eq!(
            parse_currency("not a price"),
            Err(NormalizationError::NotNumeric("not a price".into()))
        );
        assert!(parse_currency("").is_err());
        assert!(parse_currency("from 12 to 15 €").is_err());
        assert!(parse_currency("only 12 left in stock").is_err());
    }

    #[test]
    fn reorders_person_names() {
        assert_eq!(reorder_person_name("García, Juan"), "Juan García");
        assert_eq!(reorder_person_name("Juan García / Ana Ruiz"), "Juan García");
        assert_eq!(reorder_person_name("Ruiz, Ana / García, Juan"), "Ana Ruiz");
        assert_eq!(reorder_person_name("Oda, Eiichiro, Jr"), "Oda, Eiichiro, Jr");
        assert_eq!(reorder_person_name("Anonymous"), "Anonymous");
    }

    #[test]
    fn strips_isbn_noise() {
        assert_eq!(strip_dashes("978-84-1234-567-8"), "9788412345678");
        assert_eq!(strip_prefix("book_9788412345678", "book_"), "9788412345678");
        assert_eq!(strip_prefix("9788412345678", "book_"), "9788412345678");
    }

    #[test]
    fn cleans_markup_and_line_breaks() {
        assert_eq!(strip_markup("<p>Hola <b>mundo</b></p>"), "Hola mundo");
        assert_eq!(collapse_whitespace("  One\r\n Piece \n"), "One Piece");
    }

    #[test]
    fn every_normalizer_is_idempotent() {
        let samples = [
            "  <h1>García, Juan</h1>\n",
            "12,50 €",
            "978-84-1234-567-8",
            "book_book_42",
            "Juan García / Ana Ruiz",
            "a<<b>>c",
            "plain",
        ];
        let steps = [
            Normalizer::StripMarkup,
            Normalizer::CollapseWhitespace,
            Normalizer::Trim,
            Normalizer::RepairEncoding,
            Normalizer::ParseCurrency,
            Normalizer::StripDashes,
            Normalizer::StripPrefix("book_".into()),
            Normalizer::ReorderPersonName,
        ];
        for step in &steps {
            for sample in samples {
                let Ok(once) = step.apply(FieldValue::from(sample)) else {
                    continue;
                };
                let twice = step.apply(once.clone()).unwrap();
                assert_eq!(once, twice, "{:?} on {:?}", step, sample);
            }
        }
    }

    #[test]
    fn chains_apply_left_to_right_and_pass_null_through() {
        let chain = [
            Normalizer::StripMarkup,
            Normalizer::CollapseWhitespace,
            Normalizer::ParseCurrency,
        ];
        assert_eq!(
            normalize_chain("<p>\n 19,95 €\n</p>", &chain),
            Ok(FieldValue::Number(19.95))
        );
        assert_eq!(Normalizer::ParseCurrency.apply(FieldValue::Null), Ok(FieldValue::Null));
        assert_eq!(
            normalize_chain(" \n ", &[Normalizer::CollapseWhitespace]),
            Err(NormalizationError::Empty)
        );
    }

    #[test]
    fn deserializes_from_profile_json() {
        let chain: Vec<Normalizer> =
            serde_json::from_str(r#"["strip_markup", {"strip_prefix": "book_"}, "parse_currency"]"#)
                .unwrap();
        assert_eq!(
            chain,
            vec![
                Normalizer::StripMarkup,
                Normalizer::StripPrefix("book_".into()),
                Normalizer::ParseCurrency
            ]
        );
    }
}
