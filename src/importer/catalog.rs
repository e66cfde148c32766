//! Target-table introspection and read helpers.

use crate::importer::batch::{ColumnBinding, quote_identifier, quote_qualified};
use crate::importer::error::{ImportError, ImportResult};
use rocket_db_pools::sqlx::{self, PgConnection, PgPool, Row};

/// Whether `table` (optionally schema-qualified) resolves to a relation.
pub async fn table_exists(pool: &PgPool, table: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
        .bind(quote_qualified(table))
        .fetch_one(pool)
        .await
}

/// Resolve each field to its column type, in field order.
///
/// Types are rendered without their modifier (`character varying`, not
/// `character varying(3)`): the bind cast keeps the whole value and the
/// column's own length check applies on insert.
///
/// Fails with [`ImportError::TableNotFound`] or [`ImportError::UnknownColumn`]
/// before any data is written. Column names are matched exactly.
pub async fn describe_columns(
    conn: &mut PgConnection,
    table: &str,
    fields: &[String],
) -> ImportResult<Vec<ColumnBinding>> {
    let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
        .bind(quote_qualified(table))
        .fetch_one(&mut *conn)
        .await?;
    if !exists {
        return Err(ImportError::TableNotFound(table.to_string()));
    }

    let catalog: Vec<(String, String)> = sqlx::query_as(
        r#"SELECT a.attname::text, format_type(a.atttypid, NULL)
           FROM pg_attribute a
           WHERE a.attrelid = to_regclass($1)::oid
             AND a.attnum > 0
             AND NOT a.attisdropped
           ORDER BY a.attnum"#,
    )
    .bind(quote_qualified(table))
    .fetch_all(&mut *conn)
    .await?;

    fields
        .iter()
        .map(|field| {
            catalog
                .iter()
                .find(|(name, _)| name == field)
                .map(|(name, sql_type)| ColumnBinding {
                    name: name.clone(),
                    sql_type: Some(sql_type.clone()),
                })
                .ok_or_else(|| ImportError::UnknownColumn {
                    table: table.to_string(),
                    column: field.clone(),
                })
        })
        .collect()
}

/// A unique index or primary key usable as an `ON CONFLICT` arbiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueIndex {
    pub primary: bool,
    /// Key columns in index order.
    pub columns: Vec<String>,
}

/// Plain-column, non-partial, non-deferrable unique indexes of `table`.
pub async fn unique_indexes(
    conn: &mut PgConnection,
    table: &str,
) -> Result<Vec<UniqueIndex>, sqlx::Error> {
    let rows: Vec<(bool, Vec<String>)> = sqlx::query_as(
        r#"SELECT i.indisprimary, array_agg(a.attname::text ORDER BY k.ord)
           FROM pg_index i
           CROSS JOIN LATERAL unnest(i.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
           JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = k.attnum
           WHERE i.indrelid = to_regclass($1)::oid
             AND i.indisunique
             AND i.indimmediate
             AND i.indpred IS NULL
             AND i.indexprs IS NULL
             AND k.ord <= i.indnkeyatts
           GROUP BY i.indexrelid, i.indisprimary
           ORDER BY i.indexrelid"#,
    )
    .bind(quote_qualified(table))
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(primary, columns)| UniqueIndex { primary, columns })
        .collect())
}

/// Choose the columns of the `ON CONFLICT` target for the declared key fields.
///
/// An index over exactly the declared keys wins and keeps their declared order.
/// Otherwise the narrowest index whose columns are all declared keys is used,
/// the primary key first among equals. Rows are then deduplicated and matched
/// on that index alone. No key fields means no target.
pub fn conflict_target(
    table: &str,
    keys: &[String],
    indexes: &[UniqueIndex],
) -> ImportResult<Vec<String>> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }

    let covers = |index: &UniqueIndex| index.columns.iter().all(|column| keys.contains(column));

    if indexes
        .iter()
        .any(|index| covers(index) && keys.iter().all(|key| index.columns.contains(key)))
    {
        return Ok(keys.to_vec());
    }

    indexes
        .iter()
        .filter(|index| covers(index))
        .min_by_key(|index| (index.columns.len(), !index.primary))
        .map(|index| index.columns.clone())
        .ok_or_else(|| ImportError::NoMatchingUniqueIndex {
            table: table.to_string(),
            keys: keys.join(", "),
        })
}

pub async fn count_rows(pool: &PgPool, table: &str) -> Result<i64, sqlx::Error> {
    let sql = format!("SELECT COUNT(*) FROM {}", quote_qualified(table));
    sqlx::query_scalar(&sql).fetch_one(pool).await
}

/// One page of rows, every column rendered as text, ordered by the first column.
pub async fn fetch_page(
    pool: &PgPool,
    table: &str,
    columns: &[String],
    limit: i64,
    offset: i64,
) -> Result<Vec<Vec<Option<String>>>, sqlx::Error> {
    if columns.is_empty() {
        return Ok(Vec::new());
    }

    let select_list = columns
        .iter()
        .map(|column| format!("{}::text", quote_identifier(column)))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {} FROM {} ORDER BY {} LIMIT $1 OFFSET $2",
        select_list,
        quote_qualified(table),
        quote_identifier(&columns[0])
    );

    let rows = sqlx::query(&sql)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| {
            (0..columns.len())
                .map(|index| row.try_get::<Option<String>, _>(index))
                .collect()
        })
        .collect()
}
