//! Multi-row upsert statement construction.
//!
//! Each batch becomes a single `INSERT ... VALUES (...), (...)` statement where every
//! CSV cell is a positional bind parameter cast to its column's catalog type, so the
//! database does all value parsing. Identifiers are always quoted.

use crate::importer::csv_reader::{CsvBatchReader, Row};
use crate::importer::error::{ImportError, ImportResult};
use std::collections::HashMap;

/// Rows per statement unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// PostgreSQL wire protocol limit on bind parameters per statement.
pub const MAX_BIND_PARAMS: usize = 65_535;

/// Target column together with the type its bound text is cast to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnBinding {
    pub name: String,
    /// Output of `format_type()`; `None` leaves the parameter uncast.
    pub sql_type: Option<String>,
}

impl ColumnBinding {
    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: None,
        }
    }
}

/// A ready-to-execute statement and its parameters, in marker order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertStatement {
    pub sql: String,
    pub params: Vec<String>,
    /// CSV rows consumed to build this statement.
    pub rows: usize,
}

pub struct BatchUpsertBuilder {
    columns: Vec<ColumnBinding>,
    key_positions: Vec<usize>,
    batch_size: usize,
    insert_head: String,
    conflict_clause: String,
}

impl BatchUpsertBuilder {
    pub fn new(
        table: &str,
        columns: Vec<ColumnBinding>,
        unique_keys: &[String],
        batch_size: usize,
    ) -> ImportResult<Self> {
        if columns.is_empty() {
            return Err(ImportError::NoFields);
        }

        let batch_size = batch_size.max(1);
        if columns.len() * batch_size > MAX_BIND_PARAMS {
            return Err(ImportError::StatementTooLarge {
                columns: columns.len(),
                batch_size,
                limit: MAX_BIND_PARAMS,
            });
        }

        let mut key_positions = Vec::with_capacity(unique_keys.len());
        for key in unique_keys {
            let position = columns
                .iter()
                .position(|column| &column.name == key)
                .ok_or_else(|| ImportError::UnknownColumn {
                    table: table.to_string(),
                    column: key.clone(),
                })?;
            key_positions.push(position);
        }

        let column_list = columns
            .iter()
            .map(|column| quote_identifier(&column.name))
            .collect::<Vec<_>>()
            .join(", ");
        let insert_head = format!(
            "INSERT INTO {} ({}) VALUES ",
            quote_qualified(table),
            column_list
        );

        let conflict_clause = conflict_clause(&columns, &key_positions);

        Ok(Self {
            columns,
            key_positions,
            batch_size,
            insert_head,
            conflict_clause,
        })
    }

    /// Pull up to `batch_size` rows from the reader and build their statement.
    ///
    /// `first_row_index` is the 0-based file index of the next row; it is only used
    /// to report mismatches. Returns `None` once the reader is exhausted.
    pub fn next_batch(
        &self,
        reader: &mut CsvBatchReader,
        first_row_index: usize,
    ) -> ImportResult<Option<UpsertStatement>> {
        let mut rows = Vec::with_capacity(self.batch_size);

        while rows.len() < self.batch_size {
            let Some(row) = reader.next_row()? else {
                break;
            };
            self.check_arity(first_row_index + rows.len(), &row)?;
            rows.push(row);
        }

        if rows.is_empty() {
            return Ok(None);
        }

        self.build(&rows, first_row_index).map(Some)
    }

    /// Build one statement for an explicit set of rows.
    pub fn build(&self, rows: &[Row], first_row_index: usize) -> ImportResult<UpsertStatement> {
        for (offset, row) in rows.iter().enumerate() {
            self.check_arity(first_row_index + offset, row)?;
        }

        let selected = self.collapse_duplicate_keys(rows);
        let mut sql = String::with_capacity(
            self.insert_head.len() + selected.len() * self.columns.len() * 8,
        );
        let mut params = Vec::with_capacity(selected.len() * self.columns.len());

        sql.push_str(&self.insert_head);
        for (row_position, row) in selected.iter().enumerate() {
            if row_position > 0 {
                sql.push_str(", ");
            }
            sql.push('(');
            for (column_position, (value, column)) in row.iter().zip(&self.columns).enumerate() {
                if column_position > 0 {
                    sql.push_str(", ");
                }
                params.push(value.clone());
                sql.push('$');
                sql.push_str(&params.len().to_string());
                if let Some(sql_type) = &column.sql_type {
                    sql.push_str("::");
                    sql.push_str(sql_type);
                }
            }
            sql.push(')');
        }
        sql.push_str(&self.conflict_clause);

        Ok(UpsertStatement {
            sql,
            params,
            rows: rows.len(),
        })
    }

    fn check_arity(&self, row_index: usize, row: &Row) -> ImportResult<()> {
        if row.len() != self.columns.len() {
            return Err(ImportError::ColumnCountMismatch {
                row_index,
                got: row.len(),
                expected: self.columns.len(),
            });
        }
        Ok(())
    }

    // A single statement cannot update the same conflicting row twice, so repeated
    // keys within one batch keep the position of the first and the values of the last.
    fn collapse_duplicate_keys<'r>(&self, rows: &'r [Row]) -> Vec<&'r Row> {
        if self.key_positions.is_empty() {
            return rows.iter().collect();
        }

        let mut selected: Vec<&Row> = Vec::with_capacity(rows.len());
        let mut seen: HashMap<Vec<&str>, usize> = HashMap::with_capacity(rows.len());

        for row in rows {
            let key: Vec<&str> = self
                .key_positions
                .iter()
                .map(|&position| row[position].as_str())
                .collect();
            match seen.get(&key) {
                Some(&slot) => selected[slot] = row,
                None => {
                    seen.insert(key, selected.len());
                    selected.push(row);
                }
            }
        }

        if selected.len() < rows.len() {
            log::debug!(
                "collapsed {} duplicate key row(s) within one batch",
                rows.len() - selected.len()
            );
        }

        selected
    }
}

fn conflict_clause(columns: &[ColumnBinding], key_positions: &[usize]) -> String {
    if key_positions.is_empty() {
        return String::new();
    }

    let target = key_positions
        .iter()
        .map(|&position| quote_identifier(&columns[position].name))
        .collect::<Vec<_>>()
        .join(", ");

    let updates = columns
        .iter()
        .enumerate()
        .filter(|(position, _)| !key_positions.contains(position))
        .map(|(_, column)| {
            let name = quote_identifier(&column.name);
            format!("{name} = EXCLUDED.{name}")
        })
        .collect::<Vec<_>>();

    if updates.is_empty() {
        format!(" ON CONFLICT ({target}) DO NOTHING")
    } else {
        format!(" ON CONFLICT ({target}) DO UPDATE SET {}", updates.join(", "))
    }
}

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote each dot-separated part of a possibly schema-qualified name.
pub fn quote_qualified(name: &str) -> String {
    name.split('.')
        .map(quote_identifier)
        .collect::<Vec<_>>()
        .join(".")
}
