//! Versioned source field mapping
//!
//! Each canonical field lists the source field names that may carry it, in
//! priority order. A schema change on the source side is then a new table
//! (or a JSON file pointed to by `RECALL_FIELD_MAPPING_PATH`), not a code
//! change. Names may be dotted paths into nested objects
//! (`openfda.device_name`); arrays yield their first non-blank element.

use recall_common::{text::non_blank, RecallError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// Version label of the built-in openFDA device recall mapping.
pub const OPENFDA_MAPPING_VERSION: &str = "openfda-device-recall/2";

/// Version label of the mapping used by the first importer.
pub const LEGACY_MAPPING_VERSION: &str = "openfda-device-recall/1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub version: String,
    /// Source field used by the server-side `search=<field>:>YYYYMMDD` filter
    pub date_search_field: String,
    pub recall_number: Vec<String>,
    pub device_name: Vec<String>,
    #[serde(default)]
    pub manufacturer: Vec<String>,
    #[serde(default)]
    pub recalling_firm: Vec<String>,
    /// Source-provided product code, the catalog number fallback
    #[serde(default)]
    pub product_code: Vec<String>,
    pub recall_date: Vec<String>,
    #[serde(default)]
    pub reason: Vec<String>,
    #[serde(default)]
    pub status: Vec<String>,
    #[serde(default)]
    pub code_info: Vec<String>,
}

fn names(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|f| f.to_string()).collect()
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self::openfda()
    }
}

impl FieldMapping {
    /// Current mapping, preferring the product-level fields of the recall
    /// endpoint and falling back to the event-level names.
    pub fn openfda() -> Self {
        Self {
            version: OPENFDA_MAPPING_VERSION.to_string(),
            date_search_field: "event_date_posted".to_string(),
            recall_number: names(&["product_res_number", "recall_number"]),
            device_name: names(&["product_description", "openfda.device_name"]),
            manufacturer: names(&["manufacturer_name", "recalling_firm"]),
            recalling_firm: names(&["recalling_firm"]),
            product_code: names(&["cfres_id", "product_code"]),
            recall_date: names(&["event_date_posted", "report_date"]),
            reason: names(&["reason_for_recall"]),
            status: names(&["recall_status", "status"]),
            code_info: names(&["code_info"]),
        }
    }

    /// Mapping of the first importer, keyed on the enforcement-report names
    pub fn legacy() -> Self {
        Self {
            version: LEGACY_MAPPING_VERSION.to_string(),
            date_search_field: "report_date".to_string(),
            recall_number: names(&["recall_number"]),
            device_name: names(&["product_description"]),
            manufacturer: names(&["manufacturer_name"]),
            recalling_firm: names(&["recalling_firm"]),
            product_code: names(&["product_code"]),
            recall_date: names(&["report_date"]),
            reason: names(&["reason_for_recall"]),
            status: names(&["status"]),
            code_info: names(&["code_info"]),
        }
    }

    /// Load and validate a mapping table from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, RecallError> {
        let contents = std::fs::read_to_string(path)?;
        let mapping: Self = serde_json::from_str(&contents)?;
        mapping.validate()?;
        Ok(mapping)
    }

    pub fn validate(&self) -> Result<(), RecallError> {
        if self.version.trim().is_empty() {
            return Err(RecallError::Config("field mapping version cannot be empty".to_string()));
        }
        if self.date_search_field.trim().is_empty() {
            return Err(RecallError::Config(format!(
                "field mapping {} has no date search field",
                self.version
            )));
        }
        let required = [
            ("recall_number", &self.recall_number),
            ("device_name", &self.device_name),
            ("recall_date", &self.recall_date),
        ];
        for (field, candidates) in required {
            if candidates.iter().all(|c| c.trim().is_empty()) {
                return Err(RecallError::Config(format!(
                    "field mapping {} lists no source field for {field}",
                    self.version
                )));
            }
        }
        Ok(())
    }

    /// First candidate carrying a usable value, stringified and trimmed.
    pub fn lookup(object: &Map<String, Value>, candidates: &[String]) -> Option<String> {
        candidates
            .iter()
            .find_map(|name| resolve(object, name).and_then(scalar_text))
    }
}

fn resolve<'a>(object: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = object.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Strings and numbers count; blank strings, null, bools and objects do not.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_blank(s).map(str::to_string),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => items.iter().find_map(scalar_text),
        _ => None,
    }
}
