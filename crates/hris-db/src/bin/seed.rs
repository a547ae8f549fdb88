//! # Seed Data Generator
//!
//! Populates a database with a demo company for development.
//!
//! ## Usage
//! ```bash
//! # Seed company 1 into ./hris_dev.db
//! cargo run -p hris-db --bin seed
//!
//! # Seed another company
//! cargo run -p hris-db --bin seed -- --company 2
//!
//! # Specify database path
//! cargo run -p hris-db --bin seed -- --db ./data/hris.db
//! ```
//!
//! ## Generated Rows
//! - 2 divisions, 4 departments
//! - 3 grades, one position per department and grade
//! - 3 employees per department, the first one heading it
//! - 2 teams, 1 company-wide notice, 1 project

use std::env;

use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hris_core::{RowId, RowPatch};
use hris_db::{DataService, Database, DbConfig, DbError, RowFilter, SqliteDataService};

/// Divisions and the departments inside each.
const ORG_CHART: &[(&str, &[&str])] = &[
    ("Operations", &["Engineering", "Customer Success"]),
    ("Corporate", &["Finance", "People"]),
];

/// Grade name and basic monthly salary in cents.
const GRADES: &[(&str, i64)] = &[("G1", 250_000), ("G2", 400_000), ("G3", 650_000)];

const FIRST_NAMES: &[&str] = &[
    "Amara", "Bilal", "Chen", "Dara", "Elif", "Femi", "Grace", "Hiro", "Ines", "Jonas", "Kemi",
    "Lars",
];

const LAST_NAMES: &[&str] = &["Okafor", "Haddad", "Nguyen", "Silva", "Kaya", "Berg"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hris=debug,sqlx=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().collect();

    let mut company_id: i64 = 1;
    let mut db_path = String::from("./hris_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--company" | "-c" => {
                if i + 1 < args.len() {
                    company_id = args[i + 1].parse().unwrap_or(1);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("PeopleOps HRIS Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --company <ID>  Company id to seed (default: 1)");
                println!("  -d, --db <PATH>     Database file path (default: ./hris_dev.db)");
                println!("  -h, --help          Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    info!(db = %db_path, company_id, "Seeding demo company");

    let db = Database::new(DbConfig::new(&db_path)).await?;
    let backend = db.data_service();

    let existing = backend.count("departments", company_id).await?;
    if existing > 0 {
        warn!(
            company_id,
            existing, "Company already has departments, skipping seed to avoid duplicates"
        );
        return Ok(());
    }

    let start = std::time::Instant::now();
    let mut inserted = 0usize;

    let mut grade_ids = Vec::new();
    for (name, salary) in GRADES {
        let row = insert(
            &backend,
            "grades",
            RowPatch::new().set("name", *name).set("basic_salary", *salary),
            company_id,
        )
        .await?;
        grade_ids.push(row_id(&row)?);
        inserted += 1;
    }

    let mut all_employees = Vec::new();
    let mut first_department = None;
    let mut name_index = 0;

    for (division, departments) in ORG_CHART {
        let division_row = insert(
            &backend,
            "divisions",
            RowPatch::new().set("name", *division),
            company_id,
        )
        .await?;
        let division_id = row_id(&division_row)?;
        inserted += 1;

        for department in departments.iter() {
            let department_row = insert(
                &backend,
                "departments",
                RowPatch::new()
                    .set("name", *department)
                    .set("division_id", division_id.to_json()),
                company_id,
            )
            .await?;
            let department_id = row_id(&department_row)?;
            first_department.get_or_insert_with(|| department_id.clone());
            inserted += 1;

            let mut position_ids = Vec::new();
            for (grade_id, (grade, _)) in grade_ids.iter().zip(GRADES) {
                let position = insert(
                    &backend,
                    "positions",
                    RowPatch::new()
                        .set("name", format!("{} {}", department, grade))
                        .set("department_id", department_id.to_json())
                        .set("grade_id", grade_id.to_json()),
                    company_id,
                )
                .await?;
                position_ids.push(row_id(&position)?);
                inserted += 1;
            }

            let mut head: Option<String> = None;
            for slot in 0..3 {
                let first = FIRST_NAMES[name_index % FIRST_NAMES.len()];
                let last = LAST_NAMES[name_index % LAST_NAMES.len()];
                name_index += 1;

                let mut patch = RowPatch::new()
                    .set("first_name", first)
                    .set("last_name", last)
                    .set(
                        "email",
                        format!("{}.{}@demo.peopleops.dev", first, last).to_lowercase(),
                    )
                    .set("department_id", department_id.to_json())
                    .set("position_id", position_ids[slot % position_ids.len()].to_json())
                    .set("grade_id", grade_ids[slot % grade_ids.len()].to_json());
                if let Some(head_id) = &head {
                    patch.insert("supervisor_id", head_id.as_str());
                }

                let employee = insert(&backend, "employees", patch, company_id).await?;
                let employee_id = row_id(&employee)?.to_string();
                head.get_or_insert_with(|| employee_id.clone());
                all_employees.push(employee_id);
                inserted += 1;
            }

            if let Some(head_id) = head {
                backend
                    .update(
                        "departments",
                        &RowFilter::new(department_id, company_id),
                        &RowPatch::new().set("head_id", head_id),
                    )
                    .await?;
            }
        }
    }

    for (index, team) in ["Platform Guild", "Onboarding Squad"].iter().enumerate() {
        let members: Vec<Value> = all_employees
            .iter()
            .skip(index)
            .step_by(2)
            .map(|id| Value::from(id.as_str()))
            .collect();
        let lead = members.first().cloned().unwrap_or(Value::Null);
        insert(
            &backend,
            "teams",
            RowPatch::new()
                .set("name", *team)
                .set("team_lead_id", lead)
                .set("member_ids", members),
            company_id,
        )
        .await?;
        inserted += 1;
    }

    insert(
        &backend,
        "notices",
        RowPatch::new()
            .set("title", "Welcome to PeopleOps")
            .set("description", "Your HR workspace is ready.")
            .set("urgency", "normal"),
        company_id,
    )
    .await?;
    inserted += 1;

    let assignees: Vec<Value> = all_employees
        .iter()
        .skip(1)
        .take(2)
        .map(|id| Value::from(id.as_str()))
        .collect();
    insert(
        &backend,
        "projects",
        RowPatch::new()
            .set("project_title", "Quarterly payroll review")
            .set(
                "department_id",
                first_department.map(|id| id.to_json()).unwrap_or(Value::Null),
            )
            .set("assignees", assignees)
            .set(
                "supervisor_id",
                all_employees.first().cloned().map(Value::from).unwrap_or(Value::Null),
            ),
        company_id,
    )
    .await?;
    inserted += 1;

    info!(
        company_id,
        rows = inserted,
        elapsed = ?start.elapsed(),
        "Seed complete"
    );

    db.close().await;
    Ok(())
}

async fn insert(
    backend: &SqliteDataService,
    table: &str,
    patch: RowPatch,
    company_id: i64,
) -> Result<Value, DbError> {
    backend.insert(table, &patch.set("company_id", company_id)).await
}

fn row_id(row: &Value) -> Result<RowId, DbError> {
    row.get("id")
        .and_then(RowId::from_json)
        .ok_or_else(|| DbError::Internal("inserted row has no id".to_string()))
}
