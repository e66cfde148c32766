//! Structure parsing: turns the declarative YAML description of importable tables
//! into normalized [`TableSchema`] descriptors.
//!
//! Two shapes are accepted for each top-level model entry:
//!
//! - **Legacy** (no version tag): `model: [field_a, field_b]`. The table and the CSV
//!   file are both named after the model.
//! - **Version 1** (`structure_schema_version: "1"`): a mapping with `table_name`,
//!   `csv_file_name` and `fields: [{name, unique?, label?}]`.
//!
//! Any other version value invalidates that single model. Parse errors never
//! leak into sibling entries.

use crate::importer::error::SchemaError;
use regex::Regex;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::sync::LazyLock;

/// Key holding the schema version inside a versioned model entry.
pub const SCHEMA_VERSION_KEY: &str = "structure_schema_version";

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
        .expect("identifier pattern is valid")
});

/// One column of an importable table, in CSV column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FieldDescriptor {
    /// Physical column name.
    pub name: String,
    /// Human-readable label used for display.
    pub label: String,
    /// Whether the column belongs to the unique key used for upserts.
    pub unique: bool,
}

/// Normalized, shape-agnostic descriptor of one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub model_name: String,
    pub table_name: String,
    pub csv_file_name: String,
    pub fields: Vec<FieldDescriptor>,
}

impl TableSchema {
    /// Column names in CSV order.
    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Columns flagged as unique, in declaration order.
    pub fn unique_keys(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.unique)
            .map(|f| f.name.clone())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct VersionedField {
    name: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    unique: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct VersionedEntry {
    #[serde(default)]
    table_name: Option<String>,
    #[serde(default)]
    csv_file_name: Option<String>,
    #[serde(default)]
    fields: Vec<VersionedField>,
}

/// Raw model entry, tagged by the shape it was written in.
#[derive(Debug)]
pub enum SchemaEntry {
    Legacy {
        fields: Vec<String>,
    },
    V1 {
        table_name: Option<String>,
        csv_file_name: Option<String>,
        fields: Vec<FieldDescriptor>,
    },
}

impl SchemaEntry {
    /// Dispatch on the version tag of a single model entry.
    pub fn from_value(model_name: &str, value: &Value) -> Result<Self, SchemaError> {
        let malformed = |reason: String| SchemaError::Malformed {
            model: model_name.to_string(),
            reason,
        };

        match value {
            Value::Sequence(items) => {
                let mut fields = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(name) => fields.push(name.clone()),
                        other => {
                            return Err(malformed(format!(
                                "field names must be strings, got {}",
                                scalar_to_string(other)
                            )));
                        }
                    }
                }
                Ok(SchemaEntry::Legacy { fields })
            }
            Value::Mapping(map) => {
                let version = map
                    .get(SCHEMA_VERSION_KEY)
                    .ok_or_else(|| malformed(format!("missing {SCHEMA_VERSION_KEY}")))?;

                match scalar_to_string(version).as_str() {
                    "1" => parse_v1(map).map_err(|e| malformed(e.to_string())),
                    other => Err(SchemaError::UnknownSchemaVersion(other.to_string())),
                }
            }
            Value::Null => Ok(SchemaEntry::Legacy { fields: Vec::new() }),
            other => Err(malformed(format!(
                "expected a field list or a versioned mapping, got {}",
                scalar_to_string(other)
            ))),
        }
    }

    /// Collapse either shape into the canonical descriptor.
    pub fn normalize(self, model_name: &str) -> Result<TableSchema, SchemaError> {
        let schema = match self {
            SchemaEntry::Legacy { fields } => TableSchema {
                model_name: model_name.to_string(),
                table_name: model_name.to_string(),
                csv_file_name: model_name.to_string(),
                fields: fields
                    .into_iter()
                    .map(|name| FieldDescriptor {
                        label: name.clone(),
                        name,
                        unique: false,
                    })
                    .collect(),
            },
            SchemaEntry::V1 {
                table_name,
                csv_file_name,
                fields,
            } => TableSchema {
                model_name: model_name.to_string(),
                table_name: table_name.unwrap_or_else(|| model_name.to_string()),
                csv_file_name: csv_file_name.unwrap_or_else(|| model_name.to_string()),
                fields,
            },
        };

        validate_identifier(&schema.table_name)?;
        for field in &schema.fields {
            validate_identifier(&field.name)?;
        }
        if schema.csv_file_name.is_empty()
            || schema.csv_file_name.contains(['/', '\\'])
            || schema.csv_file_name.contains("..")
        {
            return Err(SchemaError::Malformed {
                model: model_name.to_string(),
                reason: format!("invalid csv_file_name \"{}\"", schema.csv_file_name),
            });
        }

        Ok(schema)
    }
}

fn parse_v1(map: &Mapping) -> Result<SchemaEntry, serde_yaml::Error> {
    let entry: VersionedEntry = serde_yaml::from_value(Value::Mapping(map.clone()))?;

    let fields = entry
        .fields
        .into_iter()
        .map(|field| FieldDescriptor {
            label: field.label.unwrap_or_else(|| field.name.clone()),
            unique: !matches!(field.unique, None | Some(Value::Bool(false))),
            name: field.name,
        })
        .collect();

    Ok(SchemaEntry::V1 {
        table_name: entry.table_name,
        csv_file_name: entry.csv_file_name,
        fields,
    })
}

fn validate_identifier(name: &str) -> Result<(), SchemaError> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(SchemaError::InvalidIdentifier(name.to_string()))
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "<unprintable>".to_string()),
    }
}

/// Parsed snapshot of every model in a structure source, in source order.
#[derive(Debug, Clone, Default)]
pub struct Structure {
    entries: Vec<(String, Result<TableSchema, SchemaError>)>,
}

impl Structure {
    /// Parse an already-loaded YAML document.
    ///
    /// Only a non-mapping root fails as a whole; each model carries its own result.
    pub fn parse(raw: &Value) -> Result<Self, SchemaError> {
        let map = raw.as_mapping().ok_or(SchemaError::NotAMapping)?;

        let mut entries = Vec::with_capacity(map.len());
        for (key, value) in map {
            let Value::String(model_name) = key else {
                log::warn!("skipping structure entry with non-string key: {:?}", key);
                continue;
            };

            let parsed = SchemaEntry::from_value(model_name, value)
                .and_then(|entry| entry.normalize(model_name));

            if let Err(err) = &parsed {
                log::warn!("model \"{}\" is invalid: {}", model_name, err);
            }

            entries.push((model_name.clone(), parsed));
        }

        Ok(Self { entries })
    }

    pub fn get(&self, model_name: &str) -> Option<&Result<TableSchema, SchemaError>> {
        self.entries
            .iter()
            .find(|(name, _)| name == model_name)
            .map(|(_, entry)| entry)
    }

    pub fn contains(&self, model_name: &str) -> bool {
        self.get(model_name).is_some()
    }

    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Structure {
        let raw: Value = serde_yaml::from_str(source).expect("valid yaml");
        Structure::parse(&raw).expect("mapping root")
    }

    #[test]
    fn legacy_entry_uses_model_name_for_table_and_file() {
        let structure = parse("cities:\n  - id\n  - name\n");
        let schema = structure.get("cities").unwrap().as_ref().unwrap();

        assert_eq!(schema.table_name, "cities");
        assert_eq!(schema.csv_file_name, "cities");
        assert_eq!(schema.field_names(), vec!["id", "name"]);
        assert_eq!(schema.fields[1].label, "name");
        assert!(schema.unique_keys().is_empty());
    }

    #[test]
    fn versioned_entry_preserves_field_order_and_unique_flags() {
        let structure = parse(
            r#"
people:
  structure_schema_version: "1"
  table_name: persons
  csv_file_name: people_export
  fields:
    - name: zeta
    - name: id
      unique: true
      label: Identifier
    - name: alpha
"#,
        );
        let schema = structure.get("people").unwrap().as_ref().unwrap();

        assert_eq!(schema.table_name, "persons");
        assert_eq!(schema.csv_file_name, "people_export");
        assert_eq!(schema.field_names(), vec!["zeta", "id", "alpha"]);
        assert_eq!(schema.unique_keys(), vec!["id"]);
        assert_eq!(schema.fields[1].label, "Identifier");
        assert_eq!(schema.fields[0].label, "zeta");
    }

    #[test]
    fn numeric_version_tag_is_accepted() {
        let structure = parse(
            "m:\n  structure_schema_version: 1\n  table_name: t\n  csv_file_name: f\n  fields:\n    - name: a\n",
        );
        assert!(structure.get("m").unwrap().is_ok());
    }

    #[test]
    fn unique_false_or_null_is_not_a_key() {
        let structure = parse(
            "m:\n  structure_schema_version: '1'\n  table_name: t\n  csv_file_name: f\n  fields:\n    - name: a\n      unique: false\n    - name: b\n      unique: yes-please\n    - name: c\n      unique: ~\n    - name: d\n      unique: 0\n",
        );
        let schema = structure.get("m").unwrap().as_ref().unwrap();
        assert_eq!(schema.unique_keys(), vec!["b", "d"]);
    }

    #[test]
    fn unknown_version_only_invalidates_its_own_model() {
        let structure = parse(
            r#"
future:
  structure_schema_version: "2"
  table_name: t
cities:
  - id
  - name
"#,
        );

        assert_eq!(
            structure.get("future").unwrap().as_ref().unwrap_err(),
            &SchemaError::UnknownSchemaVersion("2".to_string())
        );
        assert!(structure.get("cities").unwrap().is_ok());
        assert_eq!(structure.model_names().collect::<Vec<_>>(), vec!["future", "cities"]);
    }

    #[test]
    fn identifiers_are_validated() {
        let structure = parse("cities:\n  - id\n  - \"name; DROP TABLE x\"\n");
        assert!(matches!(
            structure.get("cities").unwrap(),
            Err(SchemaError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn csv_file_name_cannot_escape_base_path() {
        let structure = parse(
            "m:\n  structure_schema_version: '1'\n  table_name: t\n  csv_file_name: ../secrets\n  fields: []\n",
        );
        assert!(matches!(
            structure.get("m").unwrap(),
            Err(SchemaError::Malformed { .. })
        ));
    }

    #[test]
    fn non_mapping_root_is_rejected() {
        let raw: Value = serde_yaml::from_str("- a\n- b\n").unwrap();
        assert_eq!(Structure::parse(&raw).unwrap_err(), SchemaError::NotAMapping);
    }
}
