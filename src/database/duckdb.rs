//! DuckDB database backend implementation
//!
//! Provides an embedded database backend using DuckDB for local benchmark
//! runs. Supports both file-based persistence and in-memory mode.
//!
//! DuckDB aborts an explicit transaction on the first failed statement, so
//! [`DatabaseBackend::aborts_transaction_on_error`] keeps its default of
//! `true` here.

use std::path::{Path, PathBuf};

use super::schema::{DatabaseSchema, Placeholder, SqlBuilder};
use super::{
    DatabaseBackend, DatabaseError, DatabaseResult, ResetScope, SelectionPredicate, SinkTarget,
    SourceQuery, check_limit_scale, code_summary, parse_decimal, parse_timestamp,
};
use crate::classify::ClassificationRule;
use crate::models::{CandidateRecord, CodeSummary, OutputRecord, SinkRow};

/// Rows per statement when loading candidates
const LOAD_CHUNK_SIZE: usize = 1000;

/// DuckDB database backend
pub struct DuckDBBackend {
    /// Path to the database file (None for in-memory)
    db_path: Option<PathBuf>,
    /// DuckDB connection, owned by the run
    connection: duckdb::Connection,
    sql: SqlBuilder,
    /// Text of the prepared insert; the compiled statement lives in the
    /// connection's statement cache
    prepared_sql: Option<String>,
}

impl DuckDBBackend {
    /// Create a new DuckDB backend with a file-based database
    ///
    /// # Arguments
    /// * `db_path` - Path to the DuckDB database file
    ///
    /// # Returns
    /// A new DuckDB backend instance
    pub fn new(db_path: impl AsRef<Path>) -> DatabaseResult<Self> {
        let path = db_path.as_ref().to_path_buf();
        let connection = duckdb::Connection::open(&path).map_err(|e| {
            DatabaseError::ConnectionFailed(format!("Failed to open DuckDB: {}", e))
        })?;

        Ok(Self {
            db_path: Some(path),
            connection,
            sql: SqlBuilder::new(Placeholder::Question),
            prepared_sql: None,
        })
    }

    /// Create an in-memory DuckDB backend
    ///
    /// Useful for testing or dry runs where persistence is not needed.
    pub fn in_memory() -> DatabaseResult<Self> {
        let connection = duckdb::Connection::open_in_memory().map_err(|e| {
            DatabaseError::ConnectionFailed(format!("Failed to create in-memory DuckDB: {}", e))
        })?;

        Ok(Self {
            db_path: None,
            connection,
            sql: SqlBuilder::new(Placeholder::Question),
            prepared_sql: None,
        })
    }

    /// Get the database file path (None for in-memory)
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Check if this is an in-memory database
    pub fn is_in_memory(&self) -> bool {
        self.db_path.is_none()
    }

    /// Execute multiple SQL statements
    pub fn execute_batch(&self, sql: &str) -> DatabaseResult<()> {
        self.connection
            .execute_batch(sql)
            .map_err(|e| DatabaseError::QueryFailed(format!("Batch execute failed: {}", e)))
    }

    fn query_count(&self, sql: &str) -> DatabaseResult<u64> {
        let count: i64 = self
            .connection
            .query_row(sql, [], |row| row.get(0))
            .map_err(|e| DatabaseError::QueryFailed(format!("Count failed: {}", e)))?;
        Ok(count.max(0) as u64)
    }

    /// Convert a DuckDB row to a candidate record
    fn row_to_candidate(row: &duckdb::Row) -> duckdb::Result<CandidateRecord> {
        let credit_limit: Option<String> = row.get(2)?;
        let enrolled_at: Option<String> = row.get(6)?;

        Ok(CandidateRecord {
            id: row.get(0)?,
            email: row.get(1)?,
            credit_limit: credit_limit.as_deref().and_then(parse_decimal),
            gender: row.get(3)?,
            address1: row.get(4)?,
            address2: row.get(5)?,
            enrolled_at: enrolled_at.as_deref().and_then(parse_timestamp),
        })
    }

    fn sink_params(records: &[OutputRecord]) -> Vec<String> {
        let mut params = Vec::with_capacity(records.len() * 5);
        for record in records {
            params.push(record.period_key.clone());
            params.push(record.customer_id.clone());
            params.push(record.email.clone());
            params.push(record.code.as_str().to_string());
            params.push(record.credit_point.to_string());
        }
        params
    }
}

impl DatabaseBackend for DuckDBBackend {
    fn backend_type(&self) -> &'static str {
        "duckdb"
    }

    fn initialize(&mut self, source_table: &str, sink_table: &str) -> DatabaseResult<()> {
        self.connection
            .execute_batch(&DatabaseSchema::create_tables_sql(source_table, sink_table))
            .map_err(|e| DatabaseError::MigrationFailed(format!("Failed to create tables: {}", e)))?;

        self.connection
            .execute_batch(&DatabaseSchema::create_indexes_sql(sink_table))
            .map_err(|e| {
                DatabaseError::MigrationFailed(format!("Failed to create indexes: {}", e))
            })?;

        Ok(())
    }

    fn health_check(&mut self) -> DatabaseResult<bool> {
        let one: i32 = self
            .connection
            .query_row("SELECT 1", [], |row| row.get(0))
            .map_err(|e| DatabaseError::ConnectionFailed(format!("Health check failed: {}", e)))?;
        Ok(one == 1)
    }

    fn load_candidates(
        &mut self,
        source_table: &str,
        records: &[CandidateRecord],
    ) -> DatabaseResult<usize> {
        check_limit_scale(records)?;
        let mut loaded = 0;

        for chunk in records.chunks(LOAD_CHUNK_SIZE) {
            let sql = self.sql.insert_candidate_rows(source_table, chunk.len());

            let mut params: Vec<Option<String>> = Vec::with_capacity(chunk.len() * 7);
            for record in chunk {
                params.push(Some(record.id.clone()).filter(|id| !id.is_empty()));
                params.push(record.email.clone());
                params.push(record.credit_limit.map(|d| d.to_string()));
                params.push(record.gender.clone());
                params.push(record.address1.clone());
                params.push(record.address2.clone());
                params.push(
                    record
                        .enrolled_at
                        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
                );
            }

            let param_refs: Vec<&dyn duckdb::ToSql> =
                params.iter().map(|p| p as &dyn duckdb::ToSql).collect();

            self.connection
                .execute(&sql, param_refs.as_slice())
                .map_err(|e| {
                    DatabaseError::QueryFailed(format!(
                        "Failed to load candidates into {}: {}",
                        source_table, e
                    ))
                })?;

            loaded += chunk.len();
        }

        Ok(loaded)
    }

    fn fetch_candidates(
        &mut self,
        query: &SourceQuery,
        after_id: Option<&str>,
        limit: usize,
    ) -> DatabaseResult<Vec<CandidateRecord>> {
        let sql = self.sql.select_candidates(query, after_id.is_some(), limit);

        let mut stmt = self
            .connection
            .prepare(&sql)
            .map_err(|e| DatabaseError::QueryFailed(format!("Prepare failed: {}", e)))?;

        let string_params: Vec<String> = after_id.map(str::to_string).into_iter().collect();
        let param_refs: Vec<&dyn duckdb::ToSql> = string_params
            .iter()
            .map(|s| s as &dyn duckdb::ToSql)
            .collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_candidate)
            .map_err(|e| DatabaseError::QueryFailed(format!("Query failed: {}", e)))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| DatabaseError::QueryFailed(format!("Row fetch error: {}", e)))
    }

    fn reset_sink(&mut self, sink: &SinkTarget, scope: ResetScope) -> DatabaseResult<u64> {
        let removed = self
            .connection
            .execute(&self.sql.reset_sink(sink, scope), [])
            .map_err(|e| {
                DatabaseError::QueryFailed(format!("Failed to reset {}: {}", sink.table, e))
            })?;
        Ok(removed as u64)
    }

    fn begin(&mut self) -> DatabaseResult<()> {
        self.connection
            .execute_batch("BEGIN TRANSACTION")
            .map_err(|e| DatabaseError::TransactionFailed(format!("Begin failed: {}", e)))
    }

    fn commit(&mut self) -> DatabaseResult<()> {
        self.connection
            .execute_batch("COMMIT")
            .map_err(|e| DatabaseError::CommitFailed(e.to_string()))
    }

    fn rollback(&mut self) -> DatabaseResult<()> {
        self.connection
            .execute_batch("ROLLBACK")
            .map_err(|e| DatabaseError::TransactionFailed(format!("Rollback failed: {}", e)))
    }

    fn insert_unprepared(
        &mut self,
        sink: &SinkTarget,
        record: &OutputRecord,
    ) -> DatabaseResult<()> {
        let sql = self.sql.insert_literal(sink, record);
        self.connection
            .execute(&sql, [])
            .map(|_| ())
            .map_err(|e| {
                DatabaseError::WriteRejected(format!(
                    "Insert failed for {}: {}",
                    record.customer_id, e
                ))
            })
    }

    fn prepare_insert(&mut self, sink: &SinkTarget) -> DatabaseResult<()> {
        let sql = self.sql.insert_sink_rows(sink, 1);
        self.connection
            .prepare_cached(&sql)
            .map_err(|e| DatabaseError::QueryFailed(format!("Prepare failed: {}", e)))?;
        self.prepared_sql = Some(sql);
        Ok(())
    }

    fn insert_prepared(&mut self, record: &OutputRecord) -> DatabaseResult<()> {
        let sql = self
            .prepared_sql
            .as_deref()
            .ok_or_else(|| DatabaseError::InvalidInput("no prepared insert".to_string()))?;

        let mut stmt = self
            .connection
            .prepare_cached(sql)
            .map_err(|e| DatabaseError::QueryFailed(format!("Prepare failed: {}", e)))?;

        stmt.execute(duckdb::params![
            record.period_key,
            record.customer_id,
            record.email,
            record.code.as_str(),
            record.credit_point.to_string(),
        ])
        .map(|_| ())
        .map_err(|e| {
            DatabaseError::WriteRejected(format!("Insert failed for {}: {}", record.customer_id, e))
        })
    }

    fn release_insert(&mut self) -> DatabaseResult<()> {
        if self.prepared_sql.take().is_some() {
            self.connection.flush_prepared_statement_cache();
        }
        Ok(())
    }

    fn insert_batch(
        &mut self,
        sink: &SinkTarget,
        records: &[OutputRecord],
    ) -> DatabaseResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let sql = self.sql.insert_sink_rows(sink, records.len());
        let params = Self::sink_params(records);
        let param_refs: Vec<&dyn duckdb::ToSql> =
            params.iter().map(|p| p as &dyn duckdb::ToSql).collect();

        self.connection
            .execute(&sql, param_refs.as_slice())
            .map_err(|e| DatabaseError::BatchRejected {
                message: format!("INSERT failed for {} rows: {}", records.len(), e),
                failed_rows: None,
            })
    }

    fn insert_classified(
        &mut self,
        source_table: &str,
        predicate: &SelectionPredicate,
        sink: &SinkTarget,
        rule: &ClassificationRule,
    ) -> DatabaseResult<u64> {
        let sql = self
            .sql
            .insert_classified(source_table, predicate, sink, rule);
        let inserted = self
            .connection
            .execute(&sql, [])
            .map_err(|e| DatabaseError::WriteRejected(format!("Set insert failed: {}", e)))?;
        Ok(inserted as u64)
    }

    fn count_eligible(
        &mut self,
        source_table: &str,
        predicate: &SelectionPredicate,
    ) -> DatabaseResult<u64> {
        self.query_count(&self.sql.count_eligible(source_table, predicate))
    }

    fn count_sink(&mut self, sink: &SinkTarget) -> DatabaseResult<u64> {
        self.query_count(&self.sql.count_sink(sink))
    }

    fn sink_summary(&mut self, sink: &SinkTarget) -> DatabaseResult<Vec<CodeSummary>> {
        let mut stmt = self
            .connection
            .prepare(&self.sql.sink_summary(sink))
            .map_err(|e| DatabaseError::QueryFailed(format!("Prepare failed: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })
            .map_err(|e| DatabaseError::QueryFailed(format!("Query failed: {}", e)))?;

        let mut summary = Vec::new();
        for row in rows {
            let (code, count, sum) =
                row.map_err(|e| DatabaseError::QueryFailed(format!("Row fetch error: {}", e)))?;
            let sum = sum.as_deref().and_then(parse_decimal).unwrap_or_default();
            summary.push(code_summary(code, count.max(0) as u64, sum));
        }
        Ok(summary)
    }

    fn sink_rows(&mut self, sink: &SinkTarget) -> DatabaseResult<Vec<SinkRow>> {
        let mut stmt = self
            .connection
            .prepare(&self.sql.sink_rows(sink))
            .map_err(|e| DatabaseError::QueryFailed(format!("Prepare failed: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })
            .map_err(|e| DatabaseError::QueryFailed(format!("Query failed: {}", e)))?;

        let mut out = Vec::new();
        for row in rows {
            let (customer_id, code, point) =
                row.map_err(|e| DatabaseError::QueryFailed(format!("Row fetch error: {}", e)))?;
            out.push(SinkRow {
                customer_id,
                code,
                credit_point: point.as_deref().and_then(parse_decimal).unwrap_or_default(),
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CategoryCode;
    use chrono::{NaiveDate, NaiveDateTime};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn sink() -> SinkTarget {
        SinkTarget::new("bonus_coupon", "202506")
    }

    fn backend() -> DuckDBBackend {
        let mut backend = DuckDBBackend::in_memory().unwrap();
        backend.initialize("customer", "bonus_coupon").unwrap();
        backend
    }

    fn output(id: &str, point: &str) -> OutputRecord {
        OutputRecord {
            period_key: "202506".into(),
            customer_id: id.into(),
            email: format!("{}@example.com", id),
            code: CategoryCode::Bb,
            credit_point: Decimal::from_str(point).unwrap(),
            dispatched_at: None,
        }
    }

    #[test]
    fn test_in_memory_database() {
        let backend = DuckDBBackend::in_memory().unwrap();
        assert!(backend.is_in_memory());
        assert!(backend.db_path().is_none());
    }

    #[test]
    fn test_health_check() {
        let mut backend = DuckDBBackend::in_memory().unwrap();
        assert!(backend.health_check().unwrap());
        assert_eq!(backend.backend_type(), "duckdb");
    }

    #[test]
    fn test_initialize_is_repeatable() {
        let mut backend = backend();
        backend.initialize("customer", "bonus_coupon").unwrap();
        assert_eq!(backend.count_sink(&sink()).unwrap(), 0);
    }

    #[test]
    fn test_candidates_round_trip_exactly() {
        let mut backend = backend();
        let enrolled =
            NaiveDateTime::parse_from_str("2014-03-02 08:15:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let record = CandidateRecord::new("C001", "a@example.com", Decimal::new(350025, 2))
            .with_gender("F")
            .with_address(Some("서울 송파구"), None)
            .with_enrolled_at(enrolled);
        backend.load_candidates("customer", &[record.clone()]).unwrap();

        let page = backend
            .fetch_candidates(&SourceQuery::unfiltered("customer"), None, 10)
            .unwrap();
        assert_eq!(page, vec![record]);
    }

    #[test]
    fn test_keyset_pages_and_filter() {
        let mut backend = backend();
        let recent =
            NaiveDateTime::parse_from_str("2015-01-01 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let old =
            NaiveDateTime::parse_from_str("2010-01-01 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let records = vec![
            CandidateRecord::new("C1", "1@example.com", Decimal::from(10)).with_enrolled_at(recent),
            CandidateRecord::new("C2", "2@example.com", Decimal::from(20)).with_enrolled_at(old),
            CandidateRecord::new("C3", "3@example.com", Decimal::from(30)).with_enrolled_at(recent),
        ];
        backend.load_candidates("customer", &records).unwrap();

        let predicate = SelectionPredicate::new(NaiveDate::from_ymd_opt(2013, 1, 1).unwrap());
        let query = SourceQuery::filtered("customer", predicate);
        let first = backend.fetch_candidates(&query, None, 1).unwrap();
        assert_eq!(first[0].id, "C1");
        let second = backend.fetch_candidates(&query, Some("C1"), 1).unwrap();
        assert_eq!(second[0].id, "C3");
        assert!(backend.fetch_candidates(&query, Some("C3"), 1).unwrap().is_empty());
        assert_eq!(backend.count_eligible("customer", &predicate).unwrap(), 2);
    }

    #[test]
    fn test_write_paths_agree() {
        let mut backend = backend();
        backend.insert_unprepared(&sink(), &output("C1", "1000.50")).unwrap();

        backend.prepare_insert(&sink()).unwrap();
        backend.insert_prepared(&output("C2", "2000")).unwrap();
        backend.release_insert().unwrap();

        backend
            .insert_batch(&sink(), &[output("C3", "10.01"), output("C4", "10.00")])
            .unwrap();

        let rows = backend.sink_rows(&sink()).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].credit_point, Decimal::new(100050, 2));
        assert!(rows.iter().all(|r| r.code == "BB"));
    }

    #[test]
    fn test_prepared_insert_requires_prepare() {
        let mut backend = backend();
        assert!(matches!(
            backend.insert_prepared(&output("C1", "1")),
            Err(DatabaseError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_rollback_discards_writes() {
        let mut backend = backend();
        backend.begin().unwrap();
        backend.insert_batch(&sink(), &[output("C1", "1")]).unwrap();
        backend.rollback().unwrap();
        assert_eq!(backend.count_sink(&sink()).unwrap(), 0);

        backend.begin().unwrap();
        backend.insert_batch(&sink(), &[output("C1", "1")]).unwrap();
        backend.commit().unwrap();
        assert_eq!(backend.count_sink(&sink()).unwrap(), 1);
    }

    #[test]
    fn test_summary_averages_exactly() {
        let mut backend = backend();
        backend
            .insert_batch(&sink(), &[output("C1", "10.01"), output("C2", "10.00")])
            .unwrap();
        let summary = backend.sink_summary(&sink()).unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].code, "BB");
        assert_eq!(summary[0].count, 2);
        assert_eq!(summary[0].average_point, Decimal::new(1001, 2));
    }

    #[test]
    fn test_reset_scopes() {
        let mut backend = backend();
        let mut other = output("C9", "5");
        other.period_key = "202505".into();
        backend
            .insert_batch(&sink(), &[output("C1", "5"), other])
            .unwrap();

        assert_eq!(backend.reset_sink(&sink(), ResetScope::Period).unwrap(), 1);
        assert_eq!(backend.reset_sink(&sink(), ResetScope::Table).unwrap(), 1);
    }
}
