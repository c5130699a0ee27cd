//! Bike catalog records and the sources they are fetched from.

mod http;

pub use http::HttpCatalogClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{Error, Result};

/// One bike from the catalog.
///
/// Fields the workflow does not use (e.g. `specs`) are kept in `extra` so
/// the stored document matches the source record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub model: String,
    pub brand: String,
    pub price: f64,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl CatalogRecord {
    /// The record as a JSON document.
    pub fn to_document(&self) -> Result<JsonValue> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Decode a catalog payload: a JSON array of record objects.
pub fn parse_catalog(body: &str) -> Result<Vec<CatalogRecord>> {
    let value: JsonValue = serde_json::from_str(body)
        .map_err(|e| Error::Format(format!("catalog is not valid JSON: {}", e)))?;
    let JsonValue::Array(items) = value else {
        return Err(Error::Format("catalog is not a JSON array".into()));
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            serde_json::from_value(item)
                .map_err(|e| Error::Format(format!("record {}: {}", i + 1, e)))
        })
        .collect()
}

/// Key for the record at 1-based position `seq`, e.g. `bikes:007`.
pub fn document_key(prefix: &str, seq: usize, width: usize) -> String {
    format!("{}{:0width$}", prefix, seq, width = width)
}

/// Somewhere the catalog can be fetched from.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetch the whole catalog, in catalog order.
    async fn fetch_catalog(&self) -> Result<Vec<CatalogRecord>>;

    /// Human-readable location, for logging.
    fn describe(&self) -> String;
}
