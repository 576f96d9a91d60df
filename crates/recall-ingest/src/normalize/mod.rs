//! Raw source record to canonical [`RecallRecord`]
//!
//! Normalization is pure: the same raw record and mapping always produce the
//! same identifier and field values. Only the bookkeeping timestamps depend
//! on the clock, and [`Normalizer::normalize_at`] takes those explicitly.

pub mod catalog;
pub mod dates;
pub mod mapping;

pub use catalog::CatalogExtractor;
pub use dates::parse_recall_date;
pub use mapping::FieldMapping;

use chrono::{DateTime, Utc};
use recall_common::{fingerprint::short_fingerprint, RecallError};
use thiserror::Error;

use crate::models::{RawRecord, RecallRecord, MAX_DEVICE_NAME_LEN};

/// Device name used when the source omits one.
pub const UNKNOWN_DEVICE: &str = "Unknown Device";

/// Hex characters of the content hash used in fallback identifiers.
const FALLBACK_HASH_LEN: usize = 16;

/// Why a raw record was discarded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("record has no recall number and no identifying fields")]
    NoIdentity,
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    mapping: FieldMapping,
    extractor: CatalogExtractor,
}

impl Normalizer {
    pub fn new(mapping: FieldMapping) -> Result<Self, RecallError> {
        mapping.validate()?;
        let extractor = CatalogExtractor::new()
            .map_err(|e| RecallError::Config(format!("invalid catalog pattern: {e}")))?;
        Ok(Self { mapping, extractor })
    }

    pub fn normalize(&self, raw: &RawRecord) -> Result<RecallRecord, ParseFailure> {
        self.normalize_at(raw, Utc::now())
    }

    pub fn normalize_at(
        &self,
        raw: &RawRecord,
        now: DateTime<Utc>,
    ) -> Result<RecallRecord, ParseFailure> {
        let object = raw.0.as_object().ok_or(ParseFailure::NotAnObject)?;
        let field = |candidates: &[String]| FieldMapping::lookup(object, candidates);

        let recall_number = field(&self.mapping.recall_number);
        let device_name = field(&self.mapping.device_name);
        let manufacturer = field(&self.mapping.manufacturer);
        let recalling_firm = field(&self.mapping.recalling_firm);
        let product_code = field(&self.mapping.product_code);
        let raw_date = field(&self.mapping.recall_date);
        let code_info = field(&self.mapping.code_info);

        let stable_fields = [
            device_name.as_deref(),
            recalling_firm.as_deref(),
            manufacturer.as_deref(),
            code_info.as_deref(),
            raw_date.as_deref(),
            product_code.as_deref(),
        ];
        if recall_number.is_none() && stable_fields.iter().all(Option::is_none) {
            return Err(ParseFailure::NoIdentity);
        }

        let catalog_number = self
            .extractor
            .extract_from(code_info.as_deref(), device_name.as_deref())
            .or_else(|| product_code.clone());

        let device_name = device_name.clone().unwrap_or_else(|| UNKNOWN_DEVICE.to_string());
        let slug = slugify(recall_common::text::truncate_chars(&device_name, MAX_DEVICE_NAME_LEN));
        let identifier = derive_identifier(&slug, recall_number.as_deref(), &stable_fields);

        let record = RecallRecord {
            identifier,
            source_recall_number: recall_number,
            device_name,
            manufacturer,
            recalling_firm,
            catalog_number,
            recall_date: raw_date.as_deref().and_then(parse_recall_date),
            reason: field(&self.mapping.reason),
            status: field(&self.mapping.status),
            code_info,
            created_at: now,
            updated_at: now,
        };

        Ok(record.enforce_bounds())
    }
}

/// Lower-case, trim, whitespace runs to `_`, then drop anything outside
/// `[a-z0-9_-]`.
pub fn slugify(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '-')
        .collect()
}

/// `{slug}-{recall_number}`, or `{slug}-h{hash}` over the stable fields
/// when the source gave no recall number.
pub fn derive_identifier(slug: &str, recall_number: Option<&str>, stable_fields: &[Option<&str>]) -> String {
    match recall_number {
        Some(number) => format!("{slug}-{number}"),
        None => format!(
            "{slug}-h{}",
            short_fingerprint(stable_fields.iter().copied(), FALLBACK_HASH_LEN)
        ),
    }
}
