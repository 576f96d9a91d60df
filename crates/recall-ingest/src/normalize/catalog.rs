//! Catalog number extraction from free text
//!
//! Recall notices bury the model or catalog number in `code_info` (and
//! sometimes the product description) behind one of a handful of labels.

use recall_common::text::{collapse_whitespace, truncate_chars};
use regex::{Regex, RegexBuilder};

use crate::models::MAX_CATALOG_NUMBER_LEN;

/// Labels in priority order; the most specific comes first.
const CATALOG_LABELS: [&str; 5] = [
    r"Model/Catalog Number",
    r"Model/Catalog[:\s]+Number",
    r"Catalog Number",
    r"Model Number",
    r"Model",
];

/// Separator after the label, then a lazy value run ended by `;`, `,` or a
/// line end.
const VALUE_PATTERN: &str = r"[:\s]+([A-Za-z0-9 \t\-]+?)[ \t]*(?:;|,|\r|\n|$)";

#[derive(Debug, Clone)]
pub struct CatalogExtractor {
    rules: Vec<Regex>,
}

impl CatalogExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        let rules = CATALOG_LABELS
            .iter()
            .map(|label| {
                RegexBuilder::new(&format!("{label}{VALUE_PATTERN}"))
                    .case_insensitive(true)
                    .multi_line(true)
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// First non-empty value captured by the highest-priority matching rule
    pub fn extract(&self, text: &str) -> Option<String> {
        self.rules.iter().find_map(|rule| {
            rule.captures_iter(text)
                .filter_map(|caps| caps.get(1))
                .find_map(|m| clean(m.as_str()))
        })
    }

    /// Try `code_info` first, then the device name.
    pub fn extract_from(&self, code_info: Option<&str>, device_name: Option<&str>) -> Option<String> {
        [code_info, device_name]
            .into_iter()
            .flatten()
            .find_map(|text| self.extract(text))
    }
}

fn clean(captured: &str) -> Option<String> {
    let value = collapse_whitespace(captured);
    let value = value.split([';', ',']).next().unwrap_or_default().trim();
    if value.is_empty() {
        return None;
    }
    Some(truncate_chars(value, MAX_CATALOG_NUMBER_LEN).to_string())
}
