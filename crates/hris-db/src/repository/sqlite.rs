//! # SQLite Data Service
//!
//! [`DataService`] over the local SQLite pool.
//!
//! ## Query Construction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SelectQuery::from("employees").eq("company_id", 7)                    │
//! │      .eq("department_id", 2).order("first_name")                        │
//! │       │                                                                 │
//! │       │  table_spec("employees")  → registered, uuid ids                │
//! │       │  check_column(...)        → [a-z0-9_] only                      │
//! │       ▼                                                                 │
//! │  SELECT id, company_id, data, created_at, updated_at FROM employees    │
//! │  WHERE company_id = ?                                                   │
//! │    AND json_extract(data, '$.department_id') = ?                        │
//! │  ORDER BY json_extract(data, '$.first_name') ASC, id ASC               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Names only reach SQL after the registry check; values are always bound.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};
use tracing::{debug, info};

use hris_core::{IdStrategy, RowId, RowPatch};

use crate::error::{DbError, DbResult};
use crate::schema::{
    check_column, compose_row, is_physical_column, prepare_insert, prepare_patch, table_spec,
    timestamp, TableSpec,
};
use crate::service::{DataService, RowFilter, SelectQuery};

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// SQLite-backed data service.
#[derive(Debug, Clone)]
pub struct SqliteDataService {
    pool: SqlitePool,
}

impl SqliteDataService {
    /// Creates a new SqliteDataService.
    pub fn new(pool: SqlitePool) -> Self {
        SqliteDataService { pool }
    }

    /// Counts one tenant's rows in a table.
    pub async fn count(&self, table: &str, company_id: i64) -> DbResult<i64> {
        let spec = table_spec(table)?;
        let sql = format!("SELECT COUNT(*) FROM {} WHERE company_id = ?1", spec.name);

        let count: i64 = sqlx::query_scalar(&sql)
            .bind(company_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

#[async_trait]
impl DataService for SqliteDataService {
    async fn select(&self, query: &SelectQuery) -> DbResult<Vec<Value>> {
        let spec = table_spec(query.table())?;

        let mut sql = format!(
            "SELECT id, company_id, data, created_at, updated_at FROM {}",
            spec.name
        );
        let mut clauses = Vec::new();
        let mut binds = Vec::new();
        for (column, value) in query.filters() {
            check_column(column)?;
            if value.is_null() {
                clauses.push(format!("{} IS NULL", column_expr(column)));
            } else {
                clauses.push(format!("{} = ?", column_expr(column)));
                binds.push(value.clone());
            }
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        match query.order_by() {
            Some(column) => {
                check_column(column)?;
                sql.push_str(&format!(" ORDER BY {} ASC, id ASC", column_expr(column)));
            }
            None => sql.push_str(" ORDER BY id ASC"),
        }

        debug!(table = %spec.name, filters = binds.len(), "Selecting rows");

        let mut statement = sqlx::query(&sql);
        for value in binds {
            statement = bind_value(statement, value)?;
        }

        let rows = statement.fetch_all(&self.pool).await?;
        rows.iter().map(|row| decode_row(&spec, row)).collect()
    }

    async fn insert(&self, table: &str, row: &RowPatch) -> DbResult<Value> {
        let spec = table_spec(table)?;
        let new_row = prepare_insert(&spec, row)?;
        let now = timestamp();

        // Serial ids are unknown until the insert; any integer decodes.
        let probe_id = new_row.id.clone().unwrap_or(RowId::Int(0));
        spec.check_row(&compose_row(
            &probe_id,
            new_row.company_id,
            &new_row.data,
            &now,
            &now,
        ))?;

        let data = serde_json::to_string(&new_row.data)?;

        let id = match new_row.id {
            Some(id) => {
                let sql = format!(
                    "INSERT INTO {} (id, company_id, data, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    spec.name
                );
                bind_id(sqlx::query(&sql), &id)
                    .bind(new_row.company_id)
                    .bind(&data)
                    .bind(&now)
                    .bind(&now)
                    .execute(&self.pool)
                    .await?;
                id
            }
            None => {
                let sql = format!(
                    "INSERT INTO {} (company_id, data, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4)",
                    spec.name
                );
                let result = sqlx::query(&sql)
                    .bind(new_row.company_id)
                    .bind(&data)
                    .bind(&now)
                    .bind(&now)
                    .execute(&self.pool)
                    .await?;
                RowId::Int(result.last_insert_rowid())
            }
        };

        info!(table = %spec.name, id = %id, company_id = new_row.company_id, "Row inserted");

        Ok(compose_row(&id, new_row.company_id, &new_row.data, &now, &now))
    }

    async fn update(&self, table: &str, filter: &RowFilter, patch: &RowPatch) -> DbResult<Value> {
        let spec = table_spec(table)?;
        let changes = prepare_patch(patch)?;

        debug!(table = %spec.name, id = %filter.id, "Updating row");

        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT data, created_at FROM {} WHERE id = ?1 AND company_id = ?2",
            spec.name
        );
        let existing = bind_id(sqlx::query(&sql), &filter.id)
            .bind(filter.company_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found(spec.name, filter.id.to_string()))?;

        let stored: String = existing.try_get("data")?;
        let created_at: String = existing.try_get("created_at")?;
        let mut data: Map<String, Value> = serde_json::from_str(&stored)?;
        data.extend(changes);

        let now = timestamp();
        let row = compose_row(&filter.id, filter.company_id, &data, &created_at, &now);
        spec.check_row(&row)?;

        let sql = format!(
            "UPDATE {} SET data = ?1, updated_at = ?2 WHERE id = ?3 AND company_id = ?4",
            spec.name
        );
        let statement = sqlx::query(&sql)
            .bind(serde_json::to_string(&data)?)
            .bind(&now);
        bind_id(statement, &filter.id)
            .bind(filter.company_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(row)
    }

    async fn delete(&self, table: &str, filter: &RowFilter) -> DbResult<()> {
        let spec = table_spec(table)?;

        debug!(table = %spec.name, id = %filter.id, "Deleting row");

        let sql = format!("DELETE FROM {} WHERE id = ?1 AND company_id = ?2", spec.name);
        let result = bind_id(sqlx::query(&sql), &filter.id)
            .bind(filter.company_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(spec.name, filter.id.to_string()));
        }

        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// SQL expression for a validated column name.
fn column_expr(column: &str) -> String {
    if is_physical_column(column) {
        column.to_string()
    } else {
        format!("json_extract(data, '$.{}')", column)
    }
}

fn bind_id<'q>(query: SqliteQuery<'q>, id: &RowId) -> SqliteQuery<'q> {
    match id {
        RowId::Int(id) => query.bind(*id),
        RowId::Text(id) => query.bind(id.clone()),
    }
}

/// Binds a scalar JSON filter value the way `json_extract` returns it.
fn bind_value(query: SqliteQuery<'_>, value: Value) -> DbResult<SqliteQuery<'_>> {
    Ok(match value {
        Value::Bool(flag) => query.bind(flag),
        Value::Number(number) => match number.as_i64() {
            Some(int) => query.bind(int),
            None => query.bind(number.as_f64().unwrap_or_default()),
        },
        Value::String(text) => query.bind(text),
        Value::Null => query.bind(Option::<String>::None),
        other => {
            return Err(DbError::InvalidPayload(format!(
                "cannot filter on a non-scalar value: {}",
                other
            )))
        }
    })
}

fn decode_row(spec: &TableSpec, row: &SqliteRow) -> DbResult<Value> {
    let id = match spec.id_strategy {
        IdStrategy::Serial => RowId::Int(row.try_get("id")?),
        IdStrategy::Uuid => RowId::Text(row.try_get("id")?),
    };
    let company_id: i64 = row.try_get("company_id")?;
    let stored: String = row.try_get("data")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    let data: Map<String, Value> = serde_json::from_str(&stored)?;

    Ok(compose_row(&id, company_id, &data, &created_at, &updated_at))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use serde_json::json;

    async fn service() -> SqliteDataService {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.data_service()
    }

    #[tokio::test]
    async fn test_insert_assigns_serial_id_and_timestamps() {
        let svc = service().await;

        let row = svc
            .insert("departments", &RowPatch::new().set("name", "Eng").set("company_id", 7))
            .await
            .unwrap();

        assert_eq!(row["id"], json!(1));
        assert_eq!(row["company_id"], json!(7));
        assert_eq!(row["name"], json!("Eng"));
        assert!(row["created_at"].is_string());
    }

    #[tokio::test]
    async fn test_select_filters_by_tenant_and_orders() {
        let svc = service().await;
        for (name, company) in [("Ops", 7), ("Eng", 7), ("Sales", 8)] {
            svc.insert(
                "departments",
                &RowPatch::new().set("name", name).set("company_id", company),
            )
            .await
            .unwrap();
        }

        let rows = svc
            .select(&SelectQuery::from("departments").eq("company_id", 7).order("name"))
            .await
            .unwrap();

        let names: Vec<_> = rows.iter().map(|r| r["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["Eng", "Ops"]);
    }

    #[tokio::test]
    async fn test_select_filters_on_json_field() {
        let svc = service().await;
        for (first, dept) in [("Ada", 1), ("Bob", 2)] {
            svc.insert(
                "employees",
                &RowPatch::new()
                    .set("company_id", 1)
                    .set("first_name", first)
                    .set("last_name", "X")
                    .set("email", format!("{}@example.com", first))
                    .set("department_id", dept),
            )
            .await
            .unwrap();
        }

        let rows = svc
            .select(&SelectQuery::from("employees").eq("department_id", 2))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["first_name"], json!("Bob"));
        assert!(rows[0]["id"].is_string());
    }

    #[tokio::test]
    async fn test_update_merges_patch() {
        let svc = service().await;
        let row = svc
            .insert("teams", &RowPatch::new().set("name", "Core").set("company_id", 3))
            .await
            .unwrap();
        let id = RowId::from_json(&row["id"]).unwrap();

        let updated = svc
            .update(
                "teams",
                &RowFilter::new(id, 3),
                &RowPatch::new().set("description", "Platform team"),
            )
            .await
            .unwrap();

        assert_eq!(updated["name"], json!("Core"));
        assert_eq!(updated["description"], json!("Platform team"));
        assert_eq!(updated["created_at"], row["created_at"]);
    }

    #[tokio::test]
    async fn test_update_and_delete_respect_tenant() {
        let svc = service().await;
        let row = svc
            .insert("grades", &RowPatch::new().set("name", "G1").set("company_id", 3))
            .await
            .unwrap();
        let id = RowId::from_json(&row["id"]).unwrap();

        let err = svc
            .update("grades", &RowFilter::new(id.clone(), 4), &RowPatch::new().set("name", "X"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));

        assert!(svc.delete("grades", &RowFilter::new(id.clone(), 4)).await.is_err());
        svc.delete("grades", &RowFilter::new(id.clone(), 3)).await.unwrap();
        assert!(svc.delete("grades", &RowFilter::new(id, 3)).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_invalid_rows_and_names() {
        let svc = service().await;

        // name is required for departments
        let err = svc
            .insert("departments", &RowPatch::new().set("company_id", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidPayload(_)));

        let err = svc.select(&SelectQuery::from("users")).await.unwrap_err();
        assert!(matches!(err, DbError::UnknownTable(_)));

        let err = svc
            .select(&SelectQuery::from("departments").order("name) --"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidColumn(_)));
    }

    #[tokio::test]
    async fn test_count() {
        let svc = service().await;
        svc.insert("divisions", &RowPatch::new().set("name", "North").set("company_id", 2))
            .await
            .unwrap();
        assert_eq!(svc.count("divisions", 2).await.unwrap(), 1);
        assert_eq!(svc.count("divisions", 3).await.unwrap(), 0);
    }
}
