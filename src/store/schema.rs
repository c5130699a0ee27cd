//! Search index definition.

use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::error::{Error, Result};

/// How a document field is indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldKind {
    /// Full-text field; `nostem` disables stemming for exact matching.
    Text { nostem: bool },
    Numeric,
    Tag,
    /// FLAT (exhaustive) FLOAT32 vector field with cosine distance.
    Vector { dim: usize },
}

/// One field of the index schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    /// Name of the field in the stored document.
    pub field: String,
    /// Attribute name used in query expressions.
    pub alias: String,
    pub kind: FieldKind,
}

impl SchemaField {
    pub fn new(field: impl Into<String>, kind: FieldKind) -> Self {
        let field = field.into();
        Self {
            alias: field.clone(),
            field,
            kind,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    /// JSONPath of the field inside a document.
    pub fn json_path(&self) -> String {
        format!("$.{}", self.field)
    }
}

/// A named index over every JSON document under a key prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub prefix: String,
    pub fields: Vec<SchemaField>,
}

impl IndexDefinition {
    /// The bike catalog schema for the given configuration.
    pub fn for_catalog(config: &AppConfig) -> Self {
        Self {
            name: config.index.name.clone(),
            prefix: config.catalog.key_prefix.clone(),
            fields: vec![
                SchemaField::new("model", FieldKind::Text { nostem: true }),
                SchemaField::new("brand", FieldKind::Text { nostem: true }),
                SchemaField::new("price", FieldKind::Numeric),
                SchemaField::new("type", FieldKind::Tag),
                SchemaField::new(
                    config.embedding.source_field.clone(),
                    FieldKind::Text { nostem: false },
                ),
                SchemaField::new(
                    config.embedding.field.clone(),
                    FieldKind::Vector {
                        dim: config.embedding.dimension,
                    },
                )
                .with_alias(config.index.vector_alias.clone()),
            ],
        }
    }

    /// The single vector field.
    pub fn vector_field(&self) -> Option<&SchemaField> {
        self.fields
            .iter()
            .find(|f| matches!(f.kind, FieldKind::Vector { .. }))
    }

    /// Declared vector dimension.
    pub fn vector_dim(&self) -> Option<usize> {
        self.vector_field().and_then(|f| match f.kind {
            FieldKind::Vector { dim } => Some(dim),
            _ => None,
        })
    }

    /// Look up a field by alias.
    pub fn field_by_alias(&self, alias: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.alias == alias)
    }

    /// Reject schemas the store would refuse or silently misuse.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("index name must not be empty".into()));
        }
        if self.prefix.is_empty() {
            return Err(Error::Config("index prefix must not be empty".into()));
        }
        let vectors: Vec<_> = self
            .fields
            .iter()
            .filter_map(|f| match f.kind {
                FieldKind::Vector { dim } => Some(dim),
                _ => None,
            })
            .collect();
        match vectors.as_slice() {
            [0] => return Err(Error::Config("vector dimension must be positive".into())),
            [_] => {}
            other => {
                return Err(Error::Config(format!(
                    "index must declare exactly one vector field, found {}",
                    other.len()
                )))
            }
        }
        let mut aliases: Vec<&str> = self.fields.iter().map(|f| f.alias.as_str()).collect();
        aliases.sort_unstable();
        if aliases.windows(2).any(|w| w[0] == w[1]) {
            return Err(Error::Config("duplicate field alias in index schema".into()));
        }
        Ok(())
    }

    /// Arguments for `FT.CREATE`, excluding the command name.
    pub fn create_args(&self) -> Vec<String> {
        let mut args = vec![
            self.name.clone(),
            "ON".into(),
            "JSON".into(),
            "PREFIX".into(),
            "1".into(),
            self.prefix.clone(),
            "SCORE".into(),
            "1.0".into(),
            "SCHEMA".into(),
        ];
        for field in &self.fields {
            args.push(field.json_path());
            args.push("AS".into());
            args.push(field.alias.clone());
            match &field.kind {
                FieldKind::Text { nostem } => {
                    args.push("TEXT".into());
                    if *nostem {
                        args.push("NOSTEM".into());
                    }
                }
                FieldKind::Numeric => args.push("NUMERIC".into()),
                FieldKind::Tag => args.push("TAG".into()),
                FieldKind::Vector { dim } => {
                    args.extend(
                        ["VECTOR", "FLAT", "6", "TYPE", "FLOAT32", "DIM"]
                            .iter()
                            .map(|s| s.to_string()),
                    );
                    args.push(dim.to_string());
                    args.push("DISTANCE_METRIC".into());
                    args.push("COSINE".into());
                }
            }
        }
        args
    }
}
