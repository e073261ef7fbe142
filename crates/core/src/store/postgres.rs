//! Postgres-backed [`MedicalStore`].
//!
//! All statements are qualified with the configured schema (`medate_exam` by default). Fixture
//! inserts and namespace removal each run in one transaction.

use std::time::Duration;

use api_shared::{LabResultRecord, Patient};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use medata_types::{RecordId, ResultStatus};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::Row as SqlRow;

use super::{ColumnInfo, DateWindow, MedicalStore};
use crate::config::{PostgresSettings, StoreBackend};
use crate::constants::{DEFAULT_DB_SCHEMA, SCHEMA_DDL};
use crate::fixtures::{like_prefix_pattern, FixtureSet, Namespace};
use crate::tables::{CellValue, ColumnKind, Row, Table};
use crate::{HarnessError, HarnessResult};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_CONNECTIONS: u32 = 8;

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
    schema: String,
}

fn connect_options(settings: &PostgresSettings) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&settings.host)
        .port(settings.port)
        .username(&settings.user)
        .password(&settings.password)
        .database(&settings.database)
}

fn checked_schema(schema: &str) -> HarnessResult<String> {
    let ok = !schema.is_empty()
        && schema
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_');
    if !ok {
        return Err(HarnessError::Config(format!(
            "schema '{schema}' must be a plain identifier"
        )));
    }
    Ok(schema.to_owned())
}

/// Connection-level failures are reported as an unreachable database.
fn db_err(e: sqlx::Error) -> HarnessError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => HarnessError::DatabaseUnavailable(e.to_string()),
        other => HarnessError::Database(other),
    }
}

fn record_id(row: &PgRow, column: &str) -> HarnessResult<RecordId> {
    let raw: String = row.try_get(column).map_err(db_err)?;
    RecordId::new(&raw).map_err(|e| HarnessError::InvalidRow(format!("{column}='{raw}': {e}")))
}

fn patient_from(row: &PgRow) -> HarnessResult<Patient> {
    Ok(Patient {
        patient_id: record_id(row, "patient_id")?,
        first_name: row.try_get("first_name").map_err(db_err)?,
        last_name: row.try_get("last_name").map_err(db_err)?,
        date_of_birth: row.try_get("date_of_birth").map_err(db_err)?,
        primary_physician: row.try_get("primary_physician").map_err(db_err)?,
        insurance_provider: row.try_get("insurance_provider").map_err(db_err)?,
        blood_type: row.try_get("blood_type").map_err(db_err)?,
        allergies: row.try_get("allergies").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

fn lab_record_from(row: &PgRow) -> HarnessResult<LabResultRecord> {
    let status: String = row.try_get("result_status").map_err(db_err)?;
    let result_status: ResultStatus = status
        .parse()
        .map_err(|e| HarnessError::InvalidRow(format!("result_status: {e}")))?;
    Ok(LabResultRecord {
        result_id: row.try_get("result_id").map_err(db_err)?,
        test_id: record_id(row, "test_id")?,
        result_value: row.try_get("result_value").map_err(db_err)?,
        result_unit: row.try_get("result_unit").map_err(db_err)?,
        reference_range: row.try_get("reference_range").map_err(db_err)?,
        result_status,
        performed_date: row.try_get("performed_date").map_err(db_err)?,
        performed_time: row.try_get("performed_time").map_err(db_err)?,
        reviewing_physician: row.try_get("reviewing_physician").map_err(db_err)?,
        test_name: row.try_get("test_name").map_err(db_err)?,
    })
}

fn cells_from(table: Table, row: &PgRow) -> HarnessResult<Row> {
    let mut out = Row::new();
    for column in table.columns() {
        let name = column.name;
        let value: CellValue = match column.kind {
            ColumnKind::Text => row.try_get::<Option<String>, _>(name).map_err(db_err)?.into(),
            ColumnKind::BigInt => row.try_get::<Option<i64>, _>(name).map_err(db_err)?.into(),
            ColumnKind::Float => row.try_get::<Option<f64>, _>(name).map_err(db_err)?.into(),
            ColumnKind::Date => row.try_get::<Option<NaiveDate>, _>(name).map_err(db_err)?.into(),
            ColumnKind::Time => row.try_get::<Option<NaiveTime>, _>(name).map_err(db_err)?.into(),
            ColumnKind::Timestamp => row
                .try_get::<Option<DateTime<Utc>>, _>(name)
                .map_err(db_err)?
                .into(),
        };
        out.insert(name.to_owned(), value);
    }
    Ok(out)
}

fn column_list(table: Table) -> String {
    table
        .columns()
        .iter()
        .map(|c| c.name)
        .collect::<Vec<_>>()
        .join(", ")
}

impl PgStore {
    /// Connects eagerly, failing when the database cannot be reached.
    pub async fn connect(settings: &PostgresSettings) -> HarnessResult<Self> {
        let schema = checked_schema(&settings.schema)?;
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(connect_options(settings))
            .await
            .map_err(|e| {
                HarnessError::DatabaseUnavailable(format!("{}: {e}", settings.redacted_url()))
            })?;
        tracing::info!(url = %settings.redacted_url(), schema = %schema, "connected to postgres");
        Ok(Self { pool, schema })
    }

    /// Builds the pool without connecting; failures surface on first use.
    pub fn connect_lazy(settings: &PostgresSettings) -> HarnessResult<Self> {
        let schema = checked_schema(&settings.schema)?;
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_lazy_with(connect_options(settings));
        Ok(Self { pool, schema })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    fn qualified(&self, table: Table) -> String {
        format!("{}.{}", self.schema, table.name())
    }

    /// Creates the schema, tables and indexes if they do not exist yet.
    pub async fn apply_schema(&self) -> HarnessResult<()> {
        let ddl = schema_ddl(&self.schema);
        sqlx::raw_sql(&ddl)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        tracing::info!(schema = %self.schema, "schema applied");
        Ok(())
    }
}

/// The bundled DDL retargeted at `schema`.
pub fn schema_ddl(schema: &str) -> String {
    SCHEMA_DDL
        .replace(&format!("{DEFAULT_DB_SCHEMA}."), &format!("{schema}."))
        .replace(
            &format!("SCHEMA IF NOT EXISTS {DEFAULT_DB_SCHEMA};"),
            &format!("SCHEMA IF NOT EXISTS {schema};"),
        )
}

#[async_trait]
impl MedicalStore for PgStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Postgres
    }

    async fn ping(&self) -> HarnessResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn insert_fixtures(&self, set: &FixtureSet) -> HarnessResult<Vec<i64>> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            self.qualified(Table::PatientInformation),
            column_list(Table::PatientInformation)
        );
        for p in &set.patients {
            sqlx::query(&sql)
                .bind(p.patient_id.as_str())
                .bind(&p.first_name)
                .bind(&p.last_name)
                .bind(p.date_of_birth)
                .bind(&p.primary_physician)
                .bind(&p.insurance_provider)
                .bind(&p.blood_type)
                .bind(&p.allergies)
                .bind(p.created_at)
                .bind(p.updated_at)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5, $6)",
            self.qualified(Table::LabTests),
            column_list(Table::LabTests)
        );
        for t in &set.lab_tests {
            sqlx::query(&sql)
                .bind(t.test_id.as_str())
                .bind(t.patient_id.as_str())
                .bind(&t.test_name)
                .bind(t.order_date)
                .bind(t.order_time)
                .bind(&t.ordering_physician)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        let sql = format!(
            "INSERT INTO {} (test_id, result_value, result_unit, reference_range, result_status, \
             performed_date, performed_time, reviewing_physician) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING result_id",
            self.qualified(Table::LabResults)
        );
        let mut ids = Vec::with_capacity(set.lab_results.len());
        for r in &set.lab_results {
            let id = sqlx::query_scalar::<_, i64>(&sql)
                .bind(r.test_id.as_str())
                .bind(r.result_value)
                .bind(&r.result_unit)
                .bind(&r.reference_range)
                .bind(r.result_status.as_str())
                .bind(r.performed_date)
                .bind(r.performed_time)
                .bind(&r.reviewing_physician)
                .fetch_one(&mut *tx)
                .await
                .map_err(db_err)?;
            ids.push(id);
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            self.qualified(Table::Admissions),
            column_list(Table::Admissions)
        );
        for a in &set.admissions {
            sqlx::query(&sql)
                .bind(a.hospitalization_case_number.as_str())
                .bind(a.patient_id.as_str())
                .bind(a.admission_date)
                .bind(a.admission_time)
                .bind(a.release_date)
                .bind(a.release_time)
                .bind(&a.admission_type)
                .bind(&a.admitting_physician)
                .bind(&a.department)
                .bind(&a.room_number)
                .bind(&a.diagnosis)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(ids)
    }

    async fn remove_namespace(&self, namespace: &Namespace) -> HarnessResult<u64> {
        let pattern = namespace.like_pattern();
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut removed = 0;
        for table in Table::DELETE_ORDER {
            let sql = format!(
                "DELETE FROM {} WHERE {} LIKE $1 ESCAPE '\\'",
                self.qualified(table),
                table.namespace_column()
            );
            let done = sqlx::query(&sql)
                .bind(&pattern)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            removed += done.rows_affected();
        }
        tx.commit().await.map_err(db_err)?;
        Ok(removed)
    }

    async fn find_patient(&self, patient_id: &str) -> HarnessResult<Option<Patient>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE patient_id = $1",
            column_list(Table::PatientInformation),
            self.qualified(Table::PatientInformation)
        );
        let row = sqlx::query(&sql)
            .bind(patient_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(patient_from).transpose()
    }

    async fn lab_results(
        &self,
        patient_id: &str,
        window: DateWindow,
    ) -> HarnessResult<Option<Vec<LabResultRecord>>> {
        let exists = format!(
            "SELECT 1 FROM {} WHERE patient_id = $1",
            self.qualified(Table::PatientInformation)
        );
        let found = sqlx::query(&exists)
            .bind(patient_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        if found.is_none() {
            return Ok(None);
        }

        let sql = format!(
            "SELECT r.result_id, r.test_id, r.result_value, r.result_unit, r.reference_range, \
                    r.result_status, r.performed_date, r.performed_time, r.reviewing_physician, \
                    t.test_name \
             FROM {results} r JOIN {tests} t ON t.test_id = r.test_id \
             WHERE t.patient_id = $1 \
               AND ($2::date IS NULL OR r.performed_date >= $2) \
               AND ($3::date IS NULL OR r.performed_date <= $3) \
             ORDER BY r.performed_date, r.performed_time, r.result_id",
            results = self.qualified(Table::LabResults),
            tests = self.qualified(Table::LabTests),
        );
        let rows = sqlx::query(&sql)
            .bind(patient_id)
            .bind(window.from)
            .bind(window.to)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter()
            .map(lab_record_from)
            .collect::<HarnessResult<Vec<_>>>()
            .map(Some)
    }

    async fn rows(&self, table: Table, prefix: &str) -> HarnessResult<Vec<Row>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} LIKE $1 ESCAPE '\\' ORDER BY {}",
            column_list(table),
            self.qualified(table),
            table.namespace_column(),
            table.primary_key()
        );
        let rows = sqlx::query(&sql)
            .bind(like_prefix_pattern(prefix))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(|row| cells_from(table, row)).collect()
    }

    async fn update_reviewer(&self, result_id: i64, reviewer: &str) -> HarnessResult<bool> {
        let sql = format!(
            "UPDATE {} SET reviewing_physician = $1 WHERE result_id = $2",
            self.qualified(Table::LabResults)
        );
        let done = sqlx::query(&sql)
            .bind(reviewer)
            .bind(result_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(done.rows_affected() > 0)
    }

    async fn delete_lab_result(&self, result_id: i64) -> HarnessResult<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE result_id = $1",
            self.qualified(Table::LabResults)
        );
        let done = sqlx::query(&sql)
            .bind(result_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(done.rows_affected() > 0)
    }

    async fn column_types(&self, table: Table) -> HarnessResult<Option<Vec<ColumnInfo>>> {
        let rows = sqlx::query(
            "SELECT column_name::text AS column_name, data_type::text AS data_type, \
                    is_nullable::text AS is_nullable \
             FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 \
             ORDER BY ordinal_position",
        )
        .bind(&self.schema)
        .bind(table.name())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let nullable: String = row.try_get("is_nullable").map_err(db_err)?;
            columns.push(ColumnInfo {
                column_name: row.try_get("column_name").map_err(db_err)?,
                data_type: row.try_get("data_type").map_err(db_err)?,
                is_nullable: nullable.eq_ignore_ascii_case("YES"),
            });
        }
        Ok(Some(columns))
    }
}
