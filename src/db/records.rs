//! Scoped record storage
//!
//! Generic CRUD over the catalog tables. Column names only ever come from
//! the static catalog; every value is a bound parameter.

use super::audit::{self, AuditEntry};
use super::{new_id, now_timestamp, paginate, Database, PageRequest, WhereClause};
use crate::auth::gate::OrgScope;
use crate::error::{ApiError, FieldErrors};
use crate::models::{Assignments, ResourceSpec, CATALOG};
use anyhow::Context;
use rusqlite::{params_from_iter, types::Value as SqlValue, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, info};

/// One row as a JSON object, keyed by column name.
pub type Record = Map<String, Value>;

/// Query keys handled by the list endpoint itself rather than as column filters.
const CONTROL_KEYS: &[&str] = &["page", "limit", "organization_id"];

fn select_list(spec: &ResourceSpec) -> String {
    let mut names = vec!["id", "organization_id"];
    names.extend(spec.columns.iter().map(|c| c.name));
    names.extend(["created_at", "updated_at"]);
    names.join(", ")
}

fn map_record(spec: &ResourceSpec, row: &Row<'_>) -> rusqlite::Result<Record> {
    let mut record = Record::new();
    record.insert("id".into(), Value::String(row.get(0)?));
    record.insert("organization_id".into(), Value::String(row.get(1)?));
    for (i, column) in spec.columns.iter().enumerate() {
        let raw: SqlValue = row.get(i + 2)?;
        record.insert(column.name.into(), column.to_json(raw));
    }
    let n = spec.columns.len() + 2;
    record.insert("created_at".into(), Value::String(row.get(n)?));
    record.insert("updated_at".into(), Value::String(row.get(n + 1)?));
    Ok(record)
}

/// Equality filters from a list query string, typed per column.
pub fn query_filters(
    spec: &ResourceSpec,
    query: &HashMap<String, String>,
) -> Result<Vec<(&'static str, SqlValue)>, ApiError> {
    let mut errors = FieldErrors::new();
    let mut filters = Vec::new();

    for (key, raw) in query {
        if CONTROL_KEYS.contains(&key.as_str()) {
            continue;
        }
        match spec.column(key) {
            Some(column) => match column.filter_value(raw) {
                Ok(value) => filters.push((column.name, value)),
                Err(problem) => {
                    errors.insert(key.clone(), problem);
                }
            },
            None => {
                errors.insert(key.clone(), "unknown filter".to_string());
            }
        }
    }

    if errors.is_empty() {
        filters.sort_by_key(|(name, _)| *name);
        Ok(filters)
    } else {
        Err(ApiError::invalid_fields(errors))
    }
}

fn load_record(conn: &Connection, spec: &ResourceSpec, id: &str) -> rusqlite::Result<Option<Record>> {
    conn.query_row(
        &format!("SELECT {} FROM {} WHERE id = ?1", select_list(spec), spec.name),
        [id],
        |row| map_record(spec, row),
    )
    .optional()
}

/// Every referenced row must exist in the writing organization.
fn check_references(
    conn: &Connection,
    spec: &ResourceSpec,
    organization_id: &str,
    assignments: &Assignments,
) -> Result<(), ApiError> {
    let mut errors = FieldErrors::new();

    for (name, value) in assignments {
        let target = match spec.column(name).and_then(|c| c.references) {
            Some(target) => target,
            None => continue,
        };
        let SqlValue::Text(id) = value else {
            continue;
        };

        let found: bool = conn
            .query_row(
                &format!(
                    "SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1 AND organization_id = ?2)",
                    target
                ),
                [id.as_str(), organization_id],
                |row| row.get(0),
            )
            .with_context(|| format!("Failed to check {}.{}", spec.name, name))?;
        if !found {
            errors.insert(name.to_string(), format!("no such record in {}", target));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::invalid_fields(errors))
    }
}

/// Names of catalog tables that still point at the row.
fn dependents(conn: &Connection, spec: &ResourceSpec, id: &str) -> rusqlite::Result<Vec<&'static str>> {
    let mut found = Vec::new();
    for other in CATALOG {
        for column in other.columns.iter().filter(|c| c.references == Some(spec.name)) {
            let used: bool = conn.query_row(
                &format!(
                    "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?1)",
                    other.name, column.name
                ),
                [id],
                |row| row.get(0),
            )?;
            if used && !found.contains(&other.name) {
                found.push(other.name);
            }
        }
    }
    Ok(found)
}

fn assignments_json(assignments: &Assignments) -> Value {
    let mut changes = Map::new();
    for (name, value) in assignments {
        let json = match value {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(i) => Value::from(*i),
            SqlValue::Real(f) => Value::from(*f),
            SqlValue::Text(s) => Value::String(s.clone()),
            SqlValue::Blob(_) => Value::Null,
        };
        changes.insert(name.to_string(), json);
    }
    Value::Object(changes)
}

impl Database {
    pub async fn list_records(
        &self,
        spec: &ResourceSpec,
        scope: &OrgScope,
        filters: &[(&'static str, SqlValue)],
        page: PageRequest,
    ) -> Result<(Vec<Record>, u64), ApiError> {
        let mut clause = WhereClause::new();
        clause.scope("organization_id", scope);
        for (name, value) in filters {
            clause.eq(name, value.clone());
        }

        let conn = self.conn().await;
        let (rows, total) = paginate(
            &conn,
            spec.name,
            &select_list(spec),
            &clause,
            page,
            |row| map_record(spec, row),
        )?;
        Ok((rows, total))
    }

    pub async fn get_record(&self, spec: &ResourceSpec, id: &str) -> Result<Option<Record>, ApiError> {
        let conn = self.conn().await;
        Ok(load_record(&conn, spec, id)?)
    }

    /// Owning organization of a record, `None` when the id does not exist.
    pub async fn record_organization(&self, spec: &ResourceSpec, id: &str) -> Result<Option<String>, ApiError> {
        let conn = self.conn().await;
        let org = conn
            .query_row(
                &format!("SELECT organization_id FROM {} WHERE id = ?1", spec.name),
                [id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(org)
    }

    pub async fn insert_record(
        &self,
        spec: &ResourceSpec,
        organization_id: &str,
        assignments: &Assignments,
        actor_id: Option<&str>,
    ) -> Result<Record, ApiError> {
        let mut conn = self.conn().await;
        let tx = conn.transaction()?;

        check_references(&tx, spec, organization_id, assignments)?;

        let id = new_id();
        let now = now_timestamp();
        let mut names = vec!["id", "organization_id", "created_at", "updated_at"];
        let mut values = vec![
            SqlValue::Text(id.clone()),
            SqlValue::Text(organization_id.to_string()),
            SqlValue::Text(now.clone()),
            SqlValue::Text(now),
        ];
        for (name, value) in assignments {
            names.push(*name);
            values.push(value.clone());
        }
        let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{}", i)).collect();

        tx.execute(
            &format!(
                "INSERT INTO {} ({}) VALUES ({})",
                spec.name,
                names.join(", "),
                placeholders.join(", ")
            ),
            params_from_iter(values.iter()),
        )
        .with_context(|| format!("Failed to insert into {}", spec.name))?;

        audit::append(
            &tx,
            &AuditEntry {
                organization_id: Some(organization_id),
                actor_id,
                action: "create",
                resource: spec.name,
                resource_id: &id,
                changes: Some(assignments_json(assignments)),
            },
        )?;

        let record = load_record(&tx, spec, &id)?
            .with_context(|| format!("{} {} vanished after insert", spec.label, id))?;
        tx.commit()?;

        info!(resource = spec.name, id = %id, organization_id, "Created record");
        Ok(record)
    }

    /// Returns `None` when the id does not exist.
    pub async fn update_record(
        &self,
        spec: &ResourceSpec,
        id: &str,
        assignments: &Assignments,
        actor_id: Option<&str>,
    ) -> Result<Option<Record>, ApiError> {
        let mut conn = self.conn().await;
        let tx = conn.transaction()?;

        let organization_id: String = match tx
            .query_row(
                &format!("SELECT organization_id FROM {} WHERE id = ?1", spec.name),
                [id],
                |row| row.get(0),
            )
            .optional()?
        {
            Some(org) => org,
            None => return Ok(None),
        };

        check_references(&tx, spec, &organization_id, assignments)?;

        let mut sets = Vec::with_capacity(assignments.len() + 1);
        let mut values = Vec::with_capacity(assignments.len() + 2);
        for (name, value) in assignments {
            values.push(value.clone());
            sets.push(format!("{} = ?{}", name, values.len()));
        }
        values.push(SqlValue::Text(now_timestamp()));
        sets.push(format!("updated_at = ?{}", values.len()));
        values.push(SqlValue::Text(id.to_string()));

        tx.execute(
            &format!(
                "UPDATE {} SET {} WHERE id = ?{}",
                spec.name,
                sets.join(", "),
                values.len()
            ),
            params_from_iter(values.iter()),
        )
        .with_context(|| format!("Failed to update {}", spec.name))?;

        audit::append(
            &tx,
            &AuditEntry {
                organization_id: Some(&organization_id),
                actor_id,
                action: "update",
                resource: spec.name,
                resource_id: id,
                changes: Some(assignments_json(assignments)),
            },
        )?;

        let record = load_record(&tx, spec, id)?;
        tx.commit()?;

        debug!(resource = spec.name, id, "Updated record");
        Ok(record)
    }

    /// Hard delete. Refused with `Conflict` while other records point at it.
    pub async fn delete_record(
        &self,
        spec: &ResourceSpec,
        id: &str,
        actor_id: Option<&str>,
    ) -> Result<bool, ApiError> {
        let mut conn = self.conn().await;
        let tx = conn.transaction()?;

        let organization_id: Option<String> = tx
            .query_row(
                &format!("SELECT organization_id FROM {} WHERE id = ?1", spec.name),
                [id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(organization_id) = organization_id else {
            return Ok(false);
        };

        let blockers = dependents(&tx, spec, id)?;
        if !blockers.is_empty() {
            return Err(ApiError::Conflict(format!(
                "{} {} is still referenced by {}",
                spec.label,
                id,
                blockers.join(", ")
            )));
        }

        tx.execute(&format!("DELETE FROM {} WHERE id = ?1", spec.name), [id])
            .with_context(|| format!("Failed to delete from {}", spec.name))?;

        audit::append(
            &tx,
            &AuditEntry {
                organization_id: Some(&organization_id),
                actor_id,
                action: "delete",
                resource: spec.name,
                resource_id: id,
                changes: None,
            },
        )?;
        tx.commit()?;

        info!(resource = spec.name, id, "Deleted record");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::find;
    use serde_json::json;

    async fn seed() -> (Database, String, String) {
        let db = Database::open_in_memory().unwrap();
        let a = db.create_organization("A", None).await.unwrap();
        let b = db.create_organization("B", None).await.unwrap();
        (db, a.id, b.id)
    }

    async fn property(db: &Database, org: &str, name: &str) -> Record {
        let spec = find("properties").unwrap();
        let assignments = spec
            .validate_create(
                json!({ "name": name, "address_line1": "1 Main St", "city": "Springfield" })
                    .as_object()
                    .unwrap(),
            )
            .unwrap();
        db.insert_record(spec, org, &assignments, Some("actor")).await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let (db, org_a, _) = seed().await;
        let created = property(&db, &org_a, "Maple Court").await;

        assert_eq!(created["organization_id"], json!(org_a));
        assert_eq!(created["name"], "Maple Court");
        assert_eq!(created["state"], Value::Null);

        let spec = find("properties").unwrap();
        let id = created["id"].as_str().unwrap();
        let loaded = db.get_record(spec, id).await.unwrap().unwrap();
        assert_eq!(loaded, created);
        assert_eq!(
            db.record_organization(spec, id).await.unwrap().as_deref(),
            Some(org_a.as_str())
        );
        assert!(db.get_record(spec, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_scoping_and_filters() {
        let (db, org_a, org_b) = seed().await;
        property(&db, &org_a, "A1").await;
        property(&db, &org_a, "A2").await;
        property(&db, &org_b, "B1").await;
        let spec = find("properties").unwrap();

        let (rows, total) = db
            .list_records(spec, &OrgScope::Only(org_a.clone()), &[], PageRequest::default())
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert!(rows.iter().all(|r| r["organization_id"] == json!(org_a)));

        let (_, total) = db
            .list_records(spec, &OrgScope::All, &[], PageRequest::default())
            .await
            .unwrap();
        assert_eq!(total, 3);

        let filters = [("name", SqlValue::Text("B1".into()))];
        let (rows, total) = db
            .list_records(spec, &OrgScope::All, &filters, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0]["organization_id"], json!(org_b));

        let (rows, total) = db
            .list_records(spec, &OrgScope::All, &[], PageRequest { page: 2, limit: 2 })
            .await
            .unwrap();
        assert_eq!((rows.len(), total), (1, 3));
    }

    #[tokio::test]
    async fn test_references_must_be_same_organization() {
        let (db, org_a, org_b) = seed().await;
        let foreign = property(&db, &org_b, "B1").await;
        let units = find("units").unwrap();

        let assignments = units
            .validate_create(
                json!({ "property_id": foreign["id"], "unit_number": "1A" })
                    .as_object()
                    .unwrap(),
            )
            .unwrap();
        let err = db.insert_record(units, &org_a, &assignments, None).await.unwrap_err();
        match err {
            ApiError::Validation { details, .. } => {
                assert_eq!(details.unwrap()["property_id"], "no such record in properties");
            }
            other => panic!("expected validation error, got {:?}", other),
        }

        let local = db.insert_record(units, &org_b, &assignments, None).await.unwrap();
        assert_eq!(local["unit_number"], "1A");
    }

    #[tokio::test]
    async fn test_update_partial_and_missing() {
        let (db, org_a, _) = seed().await;
        let created = property(&db, &org_a, "Old").await;
        let spec = find("properties").unwrap();
        let id = created["id"].as_str().unwrap();

        let assignments = spec
            .validate_update(json!({ "name": "New" }).as_object().unwrap())
            .unwrap();
        let updated = db
            .update_record(spec, id, &assignments, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["name"], "New");
        assert_eq!(updated["city"], "Springfield");
        assert_eq!(updated["organization_id"], json!(org_a));

        assert!(db
            .update_record(spec, "missing", &assignments, None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_refuses_referenced_rows() {
        let (db, org_a, _) = seed().await;
        let prop = property(&db, &org_a, "P").await;
        let properties = find("properties").unwrap();
        let units = find("units").unwrap();
        let prop_id = prop["id"].as_str().unwrap();

        let assignments = units
            .validate_create(
                json!({ "property_id": prop_id, "unit_number": "2B" })
                    .as_object()
                    .unwrap(),
            )
            .unwrap();
        let unit = db.insert_record(units, &org_a, &assignments, None).await.unwrap();

        assert!(matches!(
            db.delete_record(properties, prop_id, None).await,
            Err(ApiError::Conflict(_))
        ));

        assert!(db
            .delete_record(units, unit["id"].as_str().unwrap(), None)
            .await
            .unwrap());
        assert!(db.delete_record(properties, prop_id, None).await.unwrap());
        assert!(!db.delete_record(properties, prop_id, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_mutations_are_audited() {
        let (db, org_a, _) = seed().await;
        let created = property(&db, &org_a, "P").await;
        let spec = find("properties").unwrap();
        db.delete_record(spec, created["id"].as_str().unwrap(), Some("actor"))
            .await
            .unwrap();

        let filter = audit::AuditFilter {
            resource: Some("properties".into()),
            ..Default::default()
        };
        let (entries, total) = db
            .list_audit(&OrgScope::Only(org_a), &filter, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(total, 2);
        let mut actions: Vec<_> = entries.iter().map(|e| e.action.as_str()).collect();
        actions.sort();
        assert_eq!(actions, vec!["create", "delete"]);
    }

    #[test]
    fn test_query_filters() {
        let units = find("units").unwrap();
        let mut query = HashMap::new();
        query.insert("page".to_string(), "2".to_string());
        query.insert("organization_id".to_string(), "org-a".to_string());
        query.insert("bedrooms".to_string(), "3".to_string());
        query.insert("status".to_string(), "vacant".to_string());

        let filters = query_filters(units, &query).unwrap();
        assert_eq!(
            filters,
            vec![
                ("bedrooms", SqlValue::Integer(3)),
                ("status", SqlValue::Text("vacant".into())),
            ]
        );

        query.insert("colour".to_string(), "red".to_string());
        assert!(matches!(
            query_filters(units, &query),
            Err(ApiError::Validation { .. })
        ));
    }
}
