//! Redis backend (RedisJSON + RediSearch).

use std::collections::BTreeMap;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError, Value};
use serde_json::Value as JsonValue;
use tracing::debug;

use super::{DocumentStore, IndexStats, WriteOp};
use crate::error::{Error, Result};
use crate::search::{KnnQuery, SearchHit, QUERY_VECTOR_PARAM};

/// Document store backed by a Redis server with the JSON and Search modules.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://localhost:6379/`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(store_err)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(store_err)?;
        Ok(Self { conn })
    }
}

fn store_err(err: RedisError) -> Error {
    Error::Store(err.to_string())
}

fn is_unknown_index(err: &RedisError) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("unknown index") || msg.contains("no such index")
}

/// Error for an `FT.*` command against `index`.
fn index_err(index: &str, err: RedisError) -> Error {
    if is_unknown_index(&err) {
        Error::IndexAbsent(index.to_string())
    } else {
        store_err(err)
    }
}

/// `JSON.GET`/`JSON.MGET` with a `$.` path answer with a JSON array of matches.
fn first_match(raw: Option<String>) -> Result<Option<JsonValue>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match serde_json::from_str::<JsonValue>(&raw)? {
        JsonValue::Array(mut matches) => {
            if matches.is_empty() {
                Ok(None)
            } else {
                Ok(Some(matches.swap_remove(0)))
            }
        }
        other => Ok(Some(other)),
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::SimpleString(s) => Some(s.clone()),
        Value::Int(i) => Some(i.to_string()),
        Value::Double(d) => Some(d.to_string()),
        Value::Okay => Some("OK".to_string()),
        _ => None,
    }
}

fn value_to_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Int(i) => u64::try_from(*i).ok(),
        Value::Double(d) => Some(*d as u64),
        other => value_to_string(other).and_then(|s| s.parse::<f64>().ok().map(|f| f as u64)),
    }
}

/// Flatten a reply that is either a RESP2 key/value array or a RESP3 map.
fn pairs(value: &Value) -> Vec<(&Value, &Value)> {
    match value {
        Value::Array(items) => items
            .chunks_exact(2)
            .map(|pair| (&pair[0], &pair[1]))
            .collect(),
        Value::Map(entries) => entries.iter().map(|(k, v)| (k, v)).collect(),
        _ => Vec::new(),
    }
}

/// Parse an `FT.INFO` reply.
pub(crate) fn parse_index_info(name: &str, reply: &Value) -> IndexStats {
    let mut stats = IndexStats {
        name: name.to_string(),
        ..Default::default()
    };
    for (key, value) in pairs(reply) {
        match value_to_string(key).as_deref() {
            Some("num_docs") => stats.num_docs = value_to_u64(value).unwrap_or(0),
            Some("hash_indexing_failures") => {
                stats.indexing_failures = value_to_u64(value).unwrap_or(0)
            }
            _ => {}
        }
    }
    stats
}

/// Parse an `FT.SEARCH` reply: `[total, id, [field, value, ...], id, ...]`.
pub(crate) fn parse_search_reply(reply: &Value, score_alias: &str) -> Result<Vec<SearchHit>> {
    let Value::Array(items) = reply else {
        return Err(Error::Store(format!(
            "unexpected FT.SEARCH reply: {:?}",
            reply
        )));
    };
    let mut hits = Vec::new();
    for chunk in items.get(1..).unwrap_or_default().chunks(2) {
        let id = value_to_string(&chunk[0])
            .ok_or_else(|| Error::Store("FT.SEARCH hit without id".into()))?;
        let mut fields = BTreeMap::new();
        if let Some(field_list) = chunk.get(1) {
            for (name, value) in pairs(field_list) {
                if let (Some(name), Some(value)) = (value_to_string(name), value_to_string(value))
                {
                    fields.insert(name, value);
                }
            }
        }
        let score = fields
            .get(score_alias)
            .and_then(|s| s.parse::<f32>().ok())
            .ok_or_else(|| {
                Error::Store(format!("hit {} has no numeric '{}' field", id, score_alias))
            })?;
        hits.push(SearchHit { id, score, fields });
    }
    Ok(hits)
}

#[async_trait]
impl DocumentStore for RedisStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn get_field(&self, key: &str, field: &str) -> Result<Option<JsonValue>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("JSON.GET")
            .arg(key)
            .arg(format!("$.{}", field))
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        first_match(raw)
    }

    async fn get_fields(&self, keys: &[String], field: &str) -> Result<Vec<Option<JsonValue>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let raw: Vec<Option<String>> = redis::cmd("JSON.MGET")
            .arg(keys)
            .arg(format!("$.{}", field))
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        raw.into_iter().map(first_match).collect()
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(format!("{}*", prefix))
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(keys)
    }

    async fn execute(&self, ops: Vec<WriteOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        // FT.CREATE is not queued inside MULTI/EXEC.
        if !ops.iter().any(|op| matches!(op, WriteOp::CreateIndex(_))) {
            pipe.atomic();
        }
        let count = ops.len();
        for op in ops {
            match op {
                WriteOp::PutDocument { key, document } => {
                    pipe.cmd("JSON.SET")
                        .arg(key)
                        .arg("$")
                        .arg(document.to_string())
                        .ignore();
                }
                WriteOp::SetField { key, field, value } => {
                    pipe.cmd("JSON.SET")
                        .arg(key)
                        .arg(format!("$.{}", field))
                        .arg(value.to_string())
                        .ignore();
                }
                WriteOp::CreateIndex(definition) => {
                    definition.validate()?;
                    pipe.cmd("FT.CREATE").arg(definition.create_args()).ignore();
                }
            }
        }
        let mut conn = self.conn.clone();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::StoreWrite(e.to_string()))?;
        debug!(ops = count, "Pipeline executed");
        Ok(())
    }

    async fn index_exists(&self, name: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let names: Vec<String> = redis::cmd("FT._LIST")
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(names.iter().any(|n| n == name))
    }

    async fn drop_index(&self, name: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let result: std::result::Result<(), RedisError> = redis::cmd("FT.DROPINDEX")
            .arg(name)
            .query_async(&mut conn)
            .await;
        result.map_err(|e| index_err(name, e))
    }

    async fn index_stats(&self, name: &str) -> Result<IndexStats> {
        let mut conn = self.conn.clone();
        let reply: std::result::Result<Value, RedisError> = redis::cmd("FT.INFO")
            .arg(name)
            .query_async(&mut conn)
            .await;
        reply
            .map(|reply| parse_index_info(name, &reply))
            .map_err(|e| index_err(name, e))
    }

    async fn search(&self, index: &str, query: &KnnQuery) -> Result<Vec<SearchHit>> {
        let mut cmd = redis::cmd("FT.SEARCH");
        cmd.arg(index)
            .arg(query.expression())
            .arg("SORTBY")
            .arg(&query.score_alias)
            .arg(query.sort.as_str())
            .arg("RETURN")
            .arg(query.return_fields.len())
            .arg(&query.return_fields)
            .arg("PARAMS")
            .arg(2)
            .arg(QUERY_VECTOR_PARAM)
            .arg(query.vector.as_slice())
            .arg("DIALECT")
            .arg(2)
            .arg("LIMIT")
            .arg(0)
            .arg(query.k);
        let mut conn = self.conn.clone();
        let reply: Value = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| index_err(index, e))?;
        parse_search_reply(&reply, &query.score_alias)
    }
}
