use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::Row;
use uuid::Uuid;

use super::SqliteDocumentStore;
use crate::document::{
    Direction, DocumentStore, FieldPath, Fields, Filter, FilterOp, OrderBy, Patch, StoredDocument,
};
use crate::repository::StorageError;

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

enum SqlArg {
    Text(String),
    Int(i64),
    Real(f64),
}

fn sql_arg(value: &Value) -> Result<SqlArg, StorageError> {
    match value {
        Value::Bool(b) => Ok(SqlArg::Int(i64::from(*b))),
        Value::Number(n) => n
            .as_i64()
            .map(SqlArg::Int)
            .or_else(|| n.as_f64().map(SqlArg::Real))
            .ok_or_else(|| ser(format!("unsupported number: {n}"))),
        Value::String(s) => Ok(SqlArg::Text(s.clone())),
        Value::Null | Value::Array(_) | Value::Object(_) => {
            Err(ser(format!("unsupported filter value: {value}")))
        }
    }
}

// Field names are validated to exclude quotes, so the path can be inlined.
// Inlining also lets SQLite match the expression index on the session key.
fn column(field: &str) -> Result<String, StorageError> {
    Ok(format!(
        "json_extract(body, '{}')",
        FieldPath::field(field)?.to_json_path()
    ))
}

fn map_row(row: &sqlx::sqlite::SqliteRow) -> Result<StoredDocument, StorageError> {
    let id: String = row.try_get("id").map_err(ser)?;
    let body: String = row.try_get("body").map_err(ser)?;
    let fields: Fields = serde_json::from_str(&body).map_err(ser)?;
    Ok(StoredDocument { id, fields })
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
        order_by: Option<&OrderBy>,
    ) -> Result<Vec<StoredDocument>, StorageError> {
        let mut sql = String::from("SELECT id, body FROM documents WHERE collection = ?1");
        let mut args = Vec::new();

        for filter in filters {
            let col = column(&filter.field)?;
            if filter.value.is_null() {
                let clause = match filter.op {
                    FilterOp::Eq => "IS NULL",
                    FilterOp::Ne => "IS NOT NULL",
                    op => return Err(ser(format!("cannot compare null with {op:?}"))),
                };
                sql.push_str(&format!(" AND {col} {clause}"));
                continue;
            }

            args.push(sql_arg(&filter.value)?);
            let bind = args.len() + 1;
            if filter.op == FilterOp::Ne {
                sql.push_str(&format!(" AND ({col} IS NULL OR {col} <> ?{bind})"));
            } else {
                sql.push_str(&format!(" AND {col} {} ?{bind}", filter.op.sql()));
            }
        }

        if let Some(order) = order_by {
            let col = column(&order.field)?;
            let direction = match order.direction {
                Direction::Asc => "ASC",
                Direction::Desc => "DESC",
            };
            sql.push_str(&format!(" ORDER BY {col} IS NULL, {col} {direction}, id ASC"));
        } else {
            sql.push_str(" ORDER BY id ASC");
        }

        let mut query = sqlx::query(&sql).bind(collection);
        for arg in args {
            query = match arg {
                SqlArg::Text(s) => query.bind(s),
                SqlArg::Int(i) => query.bind(i),
                SqlArg::Real(f) => query.bind(f),
            };
        }

        let rows = query.fetch_all(&self.pool).await.map_err(conn)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_row(&row)?);
        }
        Ok(out)
    }

    async fn get(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<StoredDocument>, StorageError> {
        let row = sqlx::query(
            r"
                SELECT id, body
                FROM documents
                WHERE collection = ?1 AND id = ?2
            ",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(map_row).transpose()
    }

    async fn insert(&self, collection: &str, fields: Fields) -> Result<String, StorageError> {
        let id = Uuid::new_v4().to_string();
        let body = serde_json::to_string(&fields).map_err(ser)?;

        sqlx::query(
            r"
                INSERT INTO documents (collection, id, body, created_at)
                VALUES (?1, ?2, ?3, ?4)
            ",
        )
        .bind(collection)
        .bind(&id)
        .bind(body)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::Conflict,
            other => conn(other),
        })?;

        Ok(id)
    }

    async fn update(&self, collection: &str, id: &str, patch: &Patch) -> Result<(), StorageError> {
        if patch.is_empty() {
            return match self.get(collection, id).await? {
                Some(_) => Ok(()),
                None => Err(StorageError::NotFound),
            };
        }

        // One json_set over all paths keeps the patch atomic.
        let mut sql = String::from("UPDATE documents SET body = json_set(body");
        for i in 0..patch.entries().len() {
            let path_bind = 3 + i * 2;
            sql.push_str(&format!(", ?{path_bind}, json(?{})", path_bind + 1));
        }
        sql.push_str(") WHERE collection = ?1 AND id = ?2");
        // json_set appends at index == len and ignores larger ones; indexed
        // slots must already exist. Paths are validated, so they can be inlined.
        for (path, _) in patch.entries() {
            for (array, index) in path.indexed_arrays() {
                sql.push_str(&format!(" AND json_array_length(body, '{array}') > {index}"));
            }
        }

        let mut query = sqlx::query(&sql).bind(collection).bind(id);
        for (path, value) in patch.entries() {
            let json = serde_json::to_string(value).map_err(ser)?;
            query = query.bind(path.to_json_path()).bind(json);
        }

        let res = query.execute(&self.pool).await.map_err(conn)?;
        if res.rows_affected() == 0 {
            return match self.get(collection, id).await? {
                Some(_) => Err(StorageError::Serialization(format!(
                    "patch indexes past the end of an array in {id}"
                ))),
                None => Err(StorageError::NotFound),
            };
        }
        Ok(())
    }
}
