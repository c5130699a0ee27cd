//! In-process document store with exact cosine KNN.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use tracing::debug;

use super::schema::{FieldKind, IndexDefinition};
use super::{DocumentStore, IndexStats, WriteOp};
use crate::config::SortDirection;
use crate::error::{Error, Result};
use crate::search::{bytes_to_vector, KnnQuery, SearchHit};

#[derive(Default)]
struct MemoryState {
    documents: HashMap<String, JsonValue>,
    indexes: HashMap<String, IndexDefinition>,
    pipelines_executed: usize,
    indexes_created: usize,
}

/// Document store that keeps everything in memory.
///
/// Mirrors the Redis backend's contract: pipelines apply in order and stop
/// at the first failing write, dropping a missing index yields
/// `Error::IndexAbsent`, and KNN queries must carry a vector blob matching
/// the indexed dimension.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

/// Pre-filter understood by the memory backend.
#[derive(Debug, PartialEq)]
enum Filter {
    All,
    /// `@alias:{a|b}` for tags, `@alias:word` for text, `@alias:[lo hi]` for numbers.
    Field { alias: String, value: String },
}

fn parse_filter(expr: &str) -> Result<Filter> {
    let expr = expr.trim();
    if expr.is_empty() || expr == "*" {
        return Ok(Filter::All);
    }
    let rest = expr
        .strip_prefix('@')
        .ok_or_else(|| Error::Store(format!("unsupported filter expression: {}", expr)))?;
    let (alias, value) = rest
        .split_once(':')
        .ok_or_else(|| Error::Store(format!("unsupported filter expression: {}", expr)))?;
    Ok(Filter::Field {
        alias: alias.trim().to_string(),
        value: value.trim().to_string(),
    })
}

fn json_to_display(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn matches_filter(doc: &JsonValue, def: &IndexDefinition, filter: &Filter) -> Result<bool> {
    let Filter::Field { alias, value } = filter else {
        return Ok(true);
    };
    let field = def
        .field_by_alias(alias)
        .ok_or_else(|| Error::Store(format!("unknown field in filter: @{}", alias)))?;
    let Some(stored) = doc.get(&field.field) else {
        return Ok(false);
    };
    match &field.kind {
        FieldKind::Tag => {
            let wanted = value.trim_start_matches('{').trim_end_matches('}');
            let stored = json_to_display(stored).to_lowercase();
            Ok(wanted
                .split('|')
                .any(|tag| tag.trim().to_lowercase() == stored))
        }
        FieldKind::Text { .. } => {
            let stored = json_to_display(stored).to_lowercase();
            let words: Vec<&str> = stored
                .split(|c: char| !c.is_alphanumeric())
                .filter(|w| !w.is_empty())
                .collect();
            Ok(value
                .to_lowercase()
                .split_whitespace()
                .all(|term| words.contains(&term)))
        }
        FieldKind::Numeric => {
            let range = value.trim_start_matches('[').trim_end_matches(']');
            let bounds: Vec<f64> = range
                .split_whitespace()
                .map(|b| match b {
                    "-inf" => Ok(f64::NEG_INFINITY),
                    "+inf" | "inf" => Ok(f64::INFINITY),
                    n => n
                        .parse::<f64>()
                        .map_err(|_| Error::Store(format!("bad numeric bound: {}", n))),
                })
                .collect::<Result<_>>()?;
            let [lo, hi] = bounds.as_slice() else {
                return Err(Error::Store(format!("bad numeric range: {}", value)));
            };
            Ok(stored.as_f64().is_some_and(|n| n >= *lo && n <= *hi))
        }
        FieldKind::Vector { .. } => Err(Error::Store(format!(
            "cannot filter on vector field @{}",
            alias
        ))),
    }
}

/// Vector field of a stored document.
enum StoredVector {
    Valid(Vec<f32>),
    /// Present but not a numeric array of the indexed dimension.
    Invalid,
}

fn stored_vector(doc: &JsonValue, field: &str, dim: usize) -> Option<StoredVector> {
    let raw = doc.get(field)?;
    let parsed = raw.as_array().and_then(|items| {
        items
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<Vec<f32>>>()
    });
    Some(match parsed {
        Some(vector) if vector.len() == dim => StoredVector::Valid(vector),
        _ => StoredVector::Invalid,
    })
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full document at `key`.
    pub async fn document(&self, key: &str) -> Option<JsonValue> {
        self.state.read().await.documents.get(key).cloned()
    }

    /// Number of pipelines executed so far.
    pub async fn pipelines_executed(&self) -> usize {
        self.state.read().await.pipelines_executed
    }

    /// Number of indexes created so far.
    pub async fn indexes_created(&self) -> usize {
        self.state.read().await.indexes_created
    }

    fn apply(state: &mut MemoryState, op: WriteOp) -> Result<()> {
        match op {
            WriteOp::PutDocument { key, document } => {
                state.documents.insert(key, document);
            }
            WriteOp::SetField { key, field, value } => {
                let doc = state.documents.get_mut(&key).ok_or_else(|| {
                    Error::StoreWrite(format!("{}: new objects must be created at the root", key))
                })?;
                let JsonValue::Object(map) = doc else {
                    return Err(Error::StoreWrite(format!("{}: document is not an object", key)));
                };
                map.insert(field, value);
            }
            WriteOp::CreateIndex(definition) => {
                definition.validate()?;
                if state.indexes.contains_key(&definition.name) {
                    return Err(Error::StoreWrite(format!(
                        "{}: Index already exists",
                        definition.name
                    )));
                }
                state.indexes.insert(definition.name.clone(), definition);
                state.indexes_created += 1;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get_field(&self, key: &str, field: &str) -> Result<Option<JsonValue>> {
        let state = self.state.read().await;
        Ok(state
            .documents
            .get(key)
            .and_then(|doc| doc.get(field))
            .cloned())
    }

    async fn get_fields(&self, keys: &[String], field: &str) -> Result<Vec<Option<JsonValue>>> {
        let state = self.state.read().await;
        Ok(keys
            .iter()
            .map(|key| {
                state
                    .documents
                    .get(key)
                    .and_then(|doc| doc.get(field))
                    .cloned()
            })
            .collect())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .documents
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn execute(&self, ops: Vec<WriteOp>) -> Result<()> {
        let mut state = self.state.write().await;
        state.pipelines_executed += 1;
        let count = ops.len();
        for op in ops {
            Self::apply(&mut state, op)?;
        }
        debug!(ops = count, "Pipeline executed");
        Ok(())
    }

    async fn index_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state.read().await.indexes.contains_key(name))
    }

    async fn drop_index(&self, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        match state.indexes.remove(name) {
            Some(_) => Ok(()),
            None => Err(Error::IndexAbsent(name.to_string())),
        }
    }

    async fn index_stats(&self, name: &str) -> Result<IndexStats> {
        let state = self.state.read().await;
        let def = state
            .indexes
            .get(name)
            .ok_or_else(|| Error::IndexAbsent(name.to_string()))?;
        let vector = def.vector_field();
        let dim = def.vector_dim().unwrap_or(0);
        let mut stats = IndexStats {
            name: name.to_string(),
            ..Default::default()
        };
        for (key, doc) in &state.documents {
            if !key.starts_with(&def.prefix) {
                continue;
            }
            match vector.and_then(|f| stored_vector(doc, &f.field, dim)) {
                Some(StoredVector::Invalid) => stats.indexing_failures += 1,
                _ => stats.num_docs += 1,
            }
        }
        Ok(stats)
    }

    async fn search(&self, index: &str, query: &KnnQuery) -> Result<Vec<SearchHit>> {
        let state = self.state.read().await;
        let def = state
            .indexes
            .get(index)
            .ok_or_else(|| Error::IndexAbsent(index.to_string()))?;
        let vector_field = def
            .field_by_alias(&query.vector_alias)
            .filter(|f| matches!(f.kind, FieldKind::Vector { .. }))
            .ok_or_else(|| {
                Error::Store(format!("no vector field named @{}", query.vector_alias))
            })?;
        let dim = def.vector_dim().unwrap_or(0);
        let target = bytes_to_vector(&query.vector)?;
        if target.len() != dim {
            return Err(Error::DimensionMismatch {
                expected: dim,
                actual: target.len(),
            });
        }
        let filter = parse_filter(&query.filter)?;

        let mut scored = Vec::new();
        for (key, doc) in &state.documents {
            if !key.starts_with(&def.prefix) || !matches_filter(doc, def, &filter)? {
                continue;
            }
            if let Some(StoredVector::Valid(vector)) = stored_vector(doc, &vector_field.field, dim) {
                scored.push((cosine_distance(&target, &vector), key, doc));
            }
        }
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(b.1)));
        scored.truncate(query.k);
        if query.sort == SortDirection::Descending {
            scored.reverse();
        }

        let hits = scored
            .into_iter()
            .map(|(score, key, doc)| {
                let mut fields = BTreeMap::new();
                for name in &query.return_fields {
                    if *name == query.score_alias {
                        fields.insert(name.clone(), score.to_string());
                        continue;
                    }
                    let source = def
                        .field_by_alias(name)
                        .map(|f| f.field.as_str())
                        .unwrap_or(name.as_str());
                    if let Some(value) = doc.get(source) {
                        fields.insert(name.clone(), json_to_display(value));
                    }
                }
                SearchHit {
                    id: key.clone(),
                    score,
                    fields,
                }
            })
            .collect();
        Ok(hits)
    }
}
