//! Resource catalog
//!
//! Every organization-scoped table exposed as CRUD, described once: column
//! names and types, required fields, references to other scoped tables and
//! the default allow-lists per action. Tables, routes, validation and the
//! policy table are all derived from this list.

use crate::auth::models::Role;
use crate::auth::policy::{ADMINS, EVERYONE, OCCUPANTS, OWNERS, STAFF};
use crate::error::{ApiError, FieldErrors};
use chrono::{DateTime, NaiveDate};
use rusqlite::types::Value as SqlValue;
use serde_json::{Map, Number, Value};

/// Columns every scoped table carries and clients never write directly.
pub const RESERVED_COLUMNS: &[&str] = &["id", "organization_id", "created_at", "updated_at"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    Real,
    /// `YYYY-MM-DD` or an RFC 3339 timestamp, stored as text.
    Date,
    /// Arbitrary JSON, stored serialized.
    Json,
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub required: bool,
    /// Scoped table whose row this column points at (same organization).
    pub references: Option<&'static str>,
}

const fn col(name: &'static str, kind: ColumnKind) -> Column {
    Column {
        name,
        kind,
        required: false,
        references: None,
    }
}

impl Column {
    const fn required(self) -> Self {
        Column {
            required: true,
            ..self
        }
    }

    const fn references(self, table: &'static str) -> Self {
        Column {
            references: Some(table),
            ..self
        }
    }

    pub fn sql_type(&self) -> &'static str {
        match self.kind {
            ColumnKind::Integer => "INTEGER",
            ColumnKind::Real => "REAL",
            ColumnKind::Text | ColumnKind::Date | ColumnKind::Json => "TEXT",
        }
    }

    /// JSON body value -> bound SQL value.
    pub fn to_sql(&self, value: &Value) -> Result<SqlValue, String> {
        if value.is_null() {
            return if self.required {
                Err("is required".to_string())
            } else {
                Ok(SqlValue::Null)
            };
        }

        match self.kind {
            ColumnKind::Text => match value {
                Value::String(s) if self.required && s.trim().is_empty() => {
                    Err("must not be empty".to_string())
                }
                Value::String(s) => Ok(SqlValue::Text(s.clone())),
                _ => Err("must be a string".to_string()),
            },
            ColumnKind::Integer => value
                .as_i64()
                .map(SqlValue::Integer)
                .ok_or_else(|| "must be an integer".to_string()),
            ColumnKind::Real => value
                .as_f64()
                .map(SqlValue::Real)
                .ok_or_else(|| "must be a number".to_string()),
            ColumnKind::Date => match value {
                Value::String(s) if is_date(s) => Ok(SqlValue::Text(s.clone())),
                _ => Err("must be a date (YYYY-MM-DD) or RFC 3339 timestamp".to_string()),
            },
            ColumnKind::Json => Ok(SqlValue::Text(value.to_string())),
        }
    }

    /// Query-string filter value -> bound SQL value.
    pub fn filter_value(&self, raw: &str) -> Result<SqlValue, String> {
        match self.kind {
            ColumnKind::Text | ColumnKind::Date => Ok(SqlValue::Text(raw.to_string())),
            ColumnKind::Integer => raw
                .parse::<i64>()
                .map(SqlValue::Integer)
                .map_err(|_| "must be an integer".to_string()),
            ColumnKind::Real => raw
                .parse::<f64>()
                .map(SqlValue::Real)
                .map_err(|_| "must be a number".to_string()),
            ColumnKind::Json => Err("cannot be used as a filter".to_string()),
        }
    }

    /// Stored SQL value -> JSON response value.
    pub fn to_json(&self, value: SqlValue) -> Value {
        match value {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(i) => Value::from(i),
            SqlValue::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
            SqlValue::Text(s) if self.kind == ColumnKind::Json => {
                serde_json::from_str(&s).unwrap_or(Value::String(s))
            }
            SqlValue::Text(s) => Value::String(s),
            SqlValue::Blob(_) => Value::Null,
        }
    }
}

fn is_date(s: &str) -> bool {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() || DateTime::parse_from_rfc3339(s).is_ok()
}

#[derive(Debug, Clone, Copy)]
pub struct Access {
    pub read: &'static [Role],
    pub create: &'static [Role],
    pub update: &'static [Role],
    pub delete: &'static [Role],
}

impl Access {
    pub fn actions(&self) -> [(&'static str, &'static [Role]); 4] {
        [
            ("read", self.read),
            ("create", self.create),
            ("update", self.update),
            ("delete", self.delete),
        ]
    }
}

#[derive(Debug)]
pub struct ResourceSpec {
    /// Table name and route segment.
    pub name: &'static str,
    /// Human label used in messages and audit entries.
    pub label: &'static str,
    pub columns: &'static [Column],
    pub access: Access,
}

/// Validated column assignments, in catalog order.
pub type Assignments = Vec<(&'static str, SqlValue)>;

impl ResourceSpec {
    pub fn column(&self, name: &str) -> Option<&'static Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn policy_key(&self, action: &str) -> String {
        format!("{}.{}", self.name, action)
    }

    /// Full insert: every required column present, nothing unknown.
    pub fn validate_create(&self, body: &Map<String, Value>) -> Result<Assignments, ApiError> {
        let mut errors = self.unknown_fields(body);
        let mut out = Vec::new();

        for column in self.columns {
            match body.get(column.name) {
                Some(value) => match column.to_sql(value) {
                    Ok(v) => out.push((column.name, v)),
                    Err(problem) => {
                        errors.insert(column.name.to_string(), problem);
                    }
                },
                None if column.required => {
                    errors.insert(column.name.to_string(), "is required".to_string());
                }
                None => {}
            }
        }

        if errors.is_empty() {
            Ok(out)
        } else {
            Err(ApiError::invalid_fields(errors))
        }
    }

    /// Partial update: only the supplied columns; the organization is immutable.
    pub fn validate_update(&self, body: &Map<String, Value>) -> Result<Assignments, ApiError> {
        let mut errors = self.unknown_fields(body);
        if body.contains_key("organization_id") {
            errors.insert("organization_id".to_string(), "is immutable".to_string());
        }

        let mut out = Vec::new();
        for column in self.columns {
            if let Some(value) = body.get(column.name) {
                match column.to_sql(value) {
                    Ok(v) => out.push((column.name, v)),
                    Err(problem) => {
                        errors.insert(column.name.to_string(), problem);
                    }
                }
            }
        }

        if !errors.is_empty() {
            return Err(ApiError::invalid_fields(errors));
        }
        if out.is_empty() {
            return Err(ApiError::validation("No fields to update"));
        }
        Ok(out)
    }

    fn unknown_fields(&self, body: &Map<String, Value>) -> FieldErrors {
        body.keys()
            .filter(|k| k.as_str() != "organization_id" && self.column(k).is_none())
            .map(|k| {
                let problem = if RESERVED_COLUMNS.contains(&k.as_str()) {
                    "is read-only"
                } else {
                    "unknown field"
                };
                (k.clone(), problem.to_string())
            })
            .collect()
    }
}

const TEXT: ColumnKind = ColumnKind::Text;
const INT: ColumnKind = ColumnKind::Integer;
const REAL: ColumnKind = ColumnKind::Real;
const DATE: ColumnKind = ColumnKind::Date;
const JSON: ColumnKind = ColumnKind::Json;

pub static CATALOG: &[ResourceSpec] = &[
    ResourceSpec {
        name: "landlords",
        label: "Landlord",
        columns: &[
            col("full_name", TEXT).required(),
            col("email", TEXT),
            col("phone", TEXT),
            col("company_name", TEXT),
            col("identity_id", TEXT).references("identities"),
        ],
        access: Access {
            read: STAFF,
            create: STAFF,
            update: STAFF,
            delete: ADMINS,
        },
    },
    ResourceSpec {
        name: "tenants",
        label: "Tenant",
        columns: &[
            col("first_name", TEXT).required(),
            col("last_name", TEXT).required(),
            col("email", TEXT),
            col("phone", TEXT),
            col("date_of_birth", DATE),
            col("identity_id", TEXT).references("identities"),
        ],
        access: Access {
            read: OWNERS,
            create: STAFF,
            update: STAFF,
            delete: ADMINS,
        },
    },
    ResourceSpec {
        name: "vendors",
        label: "Vendor",
        columns: &[
            col("company_name", TEXT).required(),
            col("trade", TEXT),
            col("contact_name", TEXT),
            col("email", TEXT),
            col("phone", TEXT),
            col("identity_id", TEXT).references("identities"),
        ],
        access: Access {
            read: STAFF,
            create: STAFF,
            update: STAFF,
            delete: ADMINS,
        },
    },
    ResourceSpec {
        name: "properties",
        label: "Property",
        columns: &[
            col("name", TEXT).required(),
            col("address_line1", TEXT).required(),
            col("address_line2", TEXT),
            col("city", TEXT).required(),
            col("state", TEXT),
            col("postal_code", TEXT),
            col("country", TEXT),
            col("property_type", TEXT),
            col("landlord_id", TEXT).references("landlords"),
            col("status", TEXT),
        ],
        access: Access {
            read: EVERYONE,
            create: STAFF,
            update: STAFF,
            delete: ADMINS,
        },
    },
    ResourceSpec {
        name: "units",
        label: "Unit",
        columns: &[
            col("property_id", TEXT).required().references("properties"),
            col("unit_number", TEXT).required(),
            col("bedrooms", INT),
            col("bathrooms", REAL),
            col("square_feet", INT),
            col("market_rent", REAL),
            col("status", TEXT),
        ],
        access: Access {
            read: EVERYONE,
            create: STAFF,
            update: STAFF,
            delete: ADMINS,
        },
    },
    ResourceSpec {
        name: "leases",
        label: "Lease",
        columns: &[
            col("unit_id", TEXT).required().references("units"),
            col("tenant_id", TEXT).required().references("tenants"),
            col("start_date", DATE).required(),
            col("end_date", DATE),
            col("rent_amount", REAL).required(),
            col("deposit_amount", REAL),
            col("rent_due_day", INT),
            col("status", TEXT),
        ],
        access: Access {
            read: OCCUPANTS,
            create: STAFF,
            update: STAFF,
            delete: ADMINS,
        },
    },
    ResourceSpec {
        name: "work_orders",
        label: "Work order",
        columns: &[
            col("property_id", TEXT).required().references("properties"),
            col("unit_id", TEXT).references("units"),
            col("vendor_id", TEXT).references("vendors"),
            col("title", TEXT).required(),
            col("description", TEXT),
            col("priority", TEXT),
            col("status", TEXT),
            col("scheduled_for", DATE),
            col("completed_at", DATE),
            col("cost", REAL),
        ],
        access: Access {
            read: EVERYONE,
            create: &[Role::PmcAdmin, Role::Pm, Role::Landlord, Role::Tenant],
            update: &[Role::PmcAdmin, Role::Pm, Role::Vendor],
            delete: STAFF,
        },
    },
    ResourceSpec {
        name: "rent_payments",
        label: "Rent payment",
        columns: &[
            col("lease_id", TEXT).required().references("leases"),
            col("amount", REAL).required(),
            col("due_date", DATE).required(),
            col("paid_date", DATE),
            col("method", TEXT),
            col("reference", TEXT),
            col("status", TEXT),
        ],
        access: Access {
            read: OCCUPANTS,
            create: &[Role::PmcAdmin, Role::Pm, Role::Tenant],
            update: STAFF,
            delete: ADMINS,
        },
    },
    ResourceSpec {
        name: "expenses",
        label: "Expense",
        columns: &[
            col("property_id", TEXT).references("properties"),
            col("vendor_id", TEXT).references("vendors"),
            col("category", TEXT).required(),
            col("amount", REAL).required(),
            col("incurred_on", DATE).required(),
            col("description", TEXT),
        ],
        access: Access {
            read: OWNERS,
            create: STAFF,
            update: STAFF,
            delete: ADMINS,
        },
    },
    ResourceSpec {
        name: "inspections",
        label: "Inspection",
        columns: &[
            col("property_id", TEXT).required().references("properties"),
            col("unit_id", TEXT).references("units"),
            col("inspection_type", TEXT).required(),
            col("scheduled_for", DATE),
            col("completed_at", DATE),
            col("inspector_id", TEXT).references("identities"),
            col("status", TEXT),
            col("notes", TEXT),
        ],
        access: Access {
            read: OCCUPANTS,
            create: STAFF,
            update: STAFF,
            delete: STAFF,
        },
    },
    ResourceSpec {
        name: "notifications",
        label: "Notification",
        columns: &[
            col("recipient_id", TEXT).required().references("identities"),
            col("title", TEXT).required(),
            col("body", TEXT),
            col("channel", TEXT),
            col("read_at", DATE),
        ],
        access: Access {
            read: EVERYONE,
            create: STAFF,
            update: EVERYONE,
            delete: STAFF,
        },
    },
    ResourceSpec {
        name: "forms",
        label: "Form",
        columns: &[
            col("title", TEXT).required(),
            col("description", TEXT),
            col("schema_json", JSON),
            col("status", TEXT),
        ],
        access: Access {
            read: EVERYONE,
            create: ADMINS,
            update: ADMINS,
            delete: ADMINS,
        },
    },
];

pub fn find(name: &str) -> Option<&'static ResourceSpec> {
    CATALOG.iter().find(|spec| spec.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn problems(err: ApiError) -> Value {
        match err {
            ApiError::Validation { details, .. } => details.unwrap_or(Value::Null),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_catalog_references_resolve() {
        for spec in CATALOG {
            for column in spec.columns {
                assert!(!RESERVED_COLUMNS.contains(&column.name));
                if let Some(target) = column.references {
                    assert!(
                        target == "identities" || find(target).is_some(),
                        "{}.{} references unknown {}",
                        spec.name,
                        column.name,
                        target
                    );
                }
            }
        }
    }

    #[test]
    fn test_validate_create_reports_every_field() {
        let units = find("units").unwrap();
        let err = units
            .validate_create(&body(json!({
                "bedrooms": "two",
                "color": "blue",
                "id": "x",
            })))
            .unwrap_err();

        let details = problems(err);
        assert_eq!(details["property_id"], "is required");
        assert_eq!(details["unit_number"], "is required");
        assert_eq!(details["bedrooms"], "must be an integer");
        assert_eq!(details["color"], "unknown field");
        assert_eq!(details["id"], "is read-only");
    }

    #[test]
    fn test_validate_create_converts_types() {
        let leases = find("leases").unwrap();
        let assignments = leases
            .validate_create(&body(json!({
                "unit_id": "u1",
                "tenant_id": "t1",
                "start_date": "2024-01-01",
                "rent_amount": 1200,
                "rent_due_day": 1,
                "organization_id": "ignored-here",
            })))
            .unwrap();

        assert!(assignments.contains(&("rent_amount", SqlValue::Real(1200.0))));
        assert!(assignments.contains(&("rent_due_day", SqlValue::Integer(1))));
        assert!(assignments.contains(&("start_date", SqlValue::Text("2024-01-01".into()))));
        assert!(!assignments.iter().any(|(name, _)| *name == "organization_id"));
    }

    #[test]
    fn test_bad_dates_rejected() {
        let leases = find("leases").unwrap();
        let err = leases
            .validate_update(&body(json!({ "end_date": "next tuesday" })))
            .unwrap_err();
        assert!(problems(err)["end_date"].as_str().unwrap().starts_with("must be a date"));

        assert!(leases
            .validate_update(&body(json!({ "end_date": "2025-06-30T00:00:00Z" })))
            .is_ok());
    }

    #[test]
    fn test_update_rejects_organization_change() {
        let props = find("properties").unwrap();
        let err = props
            .validate_update(&body(json!({ "organization_id": "org-b", "name": "x" })))
            .unwrap_err();
        assert_eq!(problems(err)["organization_id"], "is immutable");
    }

    #[test]
    fn test_update_requires_something() {
        let props = find("properties").unwrap();
        assert!(matches!(
            props.validate_update(&Map::new()),
            Err(ApiError::Validation { .. })
        ));
    }

    #[test]
    fn test_required_column_cannot_be_nulled() {
        let props = find("properties").unwrap();
        let err = props
            .validate_update(&body(json!({ "name": null, "state": null })))
            .unwrap_err();
        let details = problems(err);
        assert_eq!(details["name"], "is required");
        assert!(details.get("state").is_none());
    }

    #[test]
    fn test_json_column_round_trip() {
        let forms = find("forms").unwrap();
        let column = forms.column("schema_json").unwrap();
        let stored = column.to_sql(&json!({"fields": ["a", "b"]})).unwrap();
        assert_eq!(column.to_json(stored), json!({"fields": ["a", "b"]}));
    }

    #[test]
    fn test_filter_values() {
        let units = find("units").unwrap();
        assert_eq!(
            units.column("bedrooms").unwrap().filter_value("3"),
            Ok(SqlValue::Integer(3))
        );
        assert!(units.column("bedrooms").unwrap().filter_value("three").is_err());
        assert!(find("forms")
            .unwrap()
            .column("schema_json")
            .unwrap()
            .filter_value("{}")
            .is_err());
    }
}
