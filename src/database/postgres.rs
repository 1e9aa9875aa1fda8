//! PostgreSQL database backend implementation
//!
//! Provides a PostgreSQL backend for runs against a server. The client is
//! asynchronous; every call is driven to completion on a current-thread
//! runtime owned by the backend, so the pipeline sees a blocking store.
//!
//! A failed statement aborts the open transaction until it is rolled back.

use rust_decimal::Decimal;
use tokio::runtime::Runtime;
use tokio_postgres::types::ToSql;

use super::schema::{DatabaseSchema, Placeholder, SqlBuilder};
use super::{
    DatabaseBackend, DatabaseError, DatabaseResult, ResetScope, SelectionPredicate, SinkTarget,
    SourceQuery, check_limit_scale, code_summary, parse_decimal, parse_timestamp,
};
use crate::classify::ClassificationRule;
use crate::models::{CandidateRecord, CodeSummary, OutputRecord, SinkRow};

/// Rows per statement when loading candidates (seven parameters per row,
/// well under the 65535 bind limit)
const LOAD_CHUNK_SIZE: usize = 1000;

type Param<'a> = &'a (dyn ToSql + Sync);

/// PostgreSQL database backend
pub struct PostgresBackend {
    /// Connection string
    connection_string: String,
    runtime: Runtime,
    client: tokio_postgres::Client,
    sql: SqlBuilder,
    /// Server-side prepared insert, closed when dropped
    prepared: Option<tokio_postgres::Statement>,
}

impl PostgresBackend {
    /// Create a new PostgreSQL backend
    ///
    /// # Arguments
    /// * `connection_string` - PostgreSQL connection string
    ///
    /// # Returns
    /// A new PostgreSQL backend instance
    pub fn new(connection_string: &str) -> DatabaseResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DatabaseError::IoError(format!("Failed to start runtime: {}", e)))?;

        let (client, connection) = runtime
            .block_on(tokio_postgres::connect(
                connection_string,
                tokio_postgres::NoTls,
            ))
            .map_err(|e| {
                DatabaseError::ConnectionFailed(format!("Failed to connect to PostgreSQL: {}", e))
            })?;

        // The connection future makes progress whenever the runtime is driven
        runtime.spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "PostgreSQL connection error");
            }
        });

        Ok(Self {
            connection_string: connection_string.to_string(),
            runtime,
            client,
            sql: SqlBuilder::new(Placeholder::Dollar),
            prepared: None,
        })
    }

    /// Connection string with the password replaced, for logging.
    pub fn connection_string_masked(&self) -> String {
        mask_connection_string(&self.connection_string)
    }

    /// Map a client error, treating a closed connection as a lost store.
    fn store_error(
        error: tokio_postgres::Error,
        other: impl FnOnce(String) -> DatabaseError,
    ) -> DatabaseError {
        if error.is_closed() {
            DatabaseError::ConnectionFailed(error.to_string())
        } else {
            other(error.to_string())
        }
    }

    fn execute(&self, sql: &str, params: &[Param<'_>]) -> Result<u64, tokio_postgres::Error> {
        self.runtime.block_on(self.client.execute(sql, params))
    }

    fn query(
        &self,
        sql: &str,
        params: &[Param<'_>],
    ) -> Result<Vec<tokio_postgres::Row>, tokio_postgres::Error> {
        self.runtime.block_on(self.client.query(sql, params))
    }

    fn batch_execute(&self, sql: &str) -> Result<(), tokio_postgres::Error> {
        self.runtime.block_on(self.client.batch_execute(sql))
    }

    fn query_count(&self, sql: &str) -> DatabaseResult<u64> {
        let row = self
            .runtime
            .block_on(self.client.query_one(sql, &[]))
            .map_err(|e| Self::store_error(e, |m| DatabaseError::QueryFailed(format!("Count failed: {}", m))))?;
        let count: i64 = row
            .try_get(0)
            .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;
        Ok(count.max(0) as u64)
    }

    /// Convert a PostgreSQL row to a candidate record
    fn row_to_candidate(row: &tokio_postgres::Row) -> Result<CandidateRecord, tokio_postgres::Error> {
        let credit_limit: Option<String> = row.try_get(2)?;
        let enrolled_at: Option<String> = row.try_get(6)?;

        Ok(CandidateRecord {
            id: row.try_get(0)?,
            email: row.try_get(1)?,
            credit_limit: credit_limit.as_deref().and_then(parse_decimal),
            gender: row.try_get(3)?,
            address1: row.try_get(4)?,
            address2: row.try_get(5)?,
            enrolled_at: enrolled_at.as_deref().and_then(parse_timestamp),
        })
    }
}

impl DatabaseBackend for PostgresBackend {
    fn backend_type(&self) -> &'static str {
        "postgres"
    }

    fn initialize(&mut self, source_table: &str, sink_table: &str) -> DatabaseResult<()> {
        self.batch_execute(&DatabaseSchema::create_tables_sql(source_table, sink_table))
            .map_err(|e| {
                DatabaseError::MigrationFailed(format!("Failed to create tables: {}", e))
            })?;

        self.batch_execute(&DatabaseSchema::create_indexes_sql(sink_table))
            .map_err(|e| {
                DatabaseError::MigrationFailed(format!("Failed to create indexes: {}", e))
            })?;

        Ok(())
    }

    fn health_check(&mut self) -> DatabaseResult<bool> {
        self.batch_execute("SELECT 1")
            .map(|_| true)
            .map_err(|e| DatabaseError::ConnectionFailed(format!("Health check failed: {}", e)))
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
            let ids: Vec<Option<&str>> = chunk
                .iter()
                .map(|r| Some(r.id.as_str()).filter(|id| !id.is_empty()))
                .collect();

            let mut params: Vec<Param<'_>> = Vec::with_capacity(chunk.len() * 7);
            for (record, id) in chunk.iter().zip(&ids) {
                params.push(id);
                params.push(&record.email);
                params.push(&record.credit_limit);
                params.push(&record.gender);
                params.push(&record.address1);
                params.push(&record.address2);
                params.push(&record.enrolled_at);
            }

            self.execute(&sql, &params).map_err(|e| {
                Self::store_error(e, |m| {
                    DatabaseError::QueryFailed(format!(
                        "Failed to load candidates into {}: {}",
                        source_table, m
                    ))
                })
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
        let params: Vec<Param<'_>> = after_id.iter().map(|id| id as Param<'_>).collect();
        let rows = self.query(&sql, &params).map_err(|e| {
            Self::store_error(e, |m| DatabaseError::QueryFailed(format!("Query failed: {}", m)))
        })?;

        rows.iter()
            .map(Self::row_to_candidate)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DatabaseError::QueryFailed(format!("Row fetch error: {}", e)))
    }

    fn reset_sink(&mut self, sink: &SinkTarget, scope: ResetScope) -> DatabaseResult<u64> {
        self.execute(&self.sql.reset_sink(sink, scope), &[])
            .map_err(|e| {
                Self::store_error(e, |m| {
                    DatabaseError::QueryFailed(format!("Failed to reset {}: {}", sink.table, m))
                })
            })
    }

    fn begin(&mut self) -> DatabaseResult<()> {
        self.batch_execute("BEGIN")
            .map_err(|e| DatabaseError::TransactionFailed(format!("Begin failed: {}", e)))
    }

    fn commit(&mut self) -> DatabaseResult<()> {
        self.batch_execute("COMMIT")
            .map_err(|e| DatabaseError::CommitFailed(e.to_string()))
    }

    fn rollback(&mut self) -> DatabaseResult<()> {
        self.batch_execute("ROLLBACK")
            .map_err(|e| DatabaseError::TransactionFailed(format!("Rollback failed: {}", e)))
    }

    fn insert_unprepared(
        &mut self,
        sink: &SinkTarget,
        record: &OutputRecord,
    ) -> DatabaseResult<()> {
        let sql = self.sql.insert_literal(sink, record);
        self.batch_execute(&sql).map_err(|e| {
            Self::store_error(e, |m| {
                DatabaseError::WriteRejected(format!(
                    "Insert failed for {}: {}",
                    record.customer_id, m
                ))
            })
        })
    }

    fn prepare_insert(&mut self, sink: &SinkTarget) -> DatabaseResult<()> {
        let sql = self.sql.insert_sink_rows(sink, 1);
        let statement = self
            .runtime
            .block_on(self.client.prepare(&sql))
            .map_err(|e| Self::store_error(e, |m| DatabaseError::QueryFailed(format!("Prepare failed: {}", m))))?;
        self.prepared = Some(statement);
        Ok(())
    }

    fn insert_prepared(&mut self, record: &OutputRecord) -> DatabaseResult<()> {
        let statement = self
            .prepared
            .as_ref()
            .ok_or_else(|| DatabaseError::InvalidInput("no prepared insert".to_string()))?;

        let code = record.code.as_str();
        let params: [Param<'_>; 5] = [
            &record.period_key,
            &record.customer_id,
            &record.email,
            &code,
            &record.credit_point,
        ];

        self.runtime
            .block_on(self.client.execute(statement, &params))
            .map(|_| ())
            .map_err(|e| {
                Self::store_error(e, |m| {
                    DatabaseError::WriteRejected(format!(
                        "Insert failed for {}: {}",
                        record.customer_id, m
                    ))
                })
            })
    }

    fn release_insert(&mut self) -> DatabaseResult<()> {
        self.prepared = None;
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
        let codes: Vec<&str> = records.iter().map(|r| r.code.as_str()).collect();
        let points: Vec<Decimal> = records.iter().map(|r| r.credit_point).collect();

        let mut params: Vec<Param<'_>> = Vec::with_capacity(records.len() * 5);
        for ((record, code), point) in records.iter().zip(&codes).zip(&points) {
            params.push(&record.period_key);
            params.push(&record.customer_id);
            params.push(&record.email);
            params.push(code);
            params.push(point);
        }

        self.execute(&sql, &params)
            .map(|n| n as usize)
            .map_err(|e| {
                if e.is_closed() {
                    return DatabaseError::ConnectionFailed(e.to_string());
                }
                DatabaseError::BatchRejected {
                    message: format!("INSERT failed for {} rows: {}", records.len(), e),
                    failed_rows: None,
                }
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
        self.execute(&sql, &[]).map_err(|e| {
            Self::store_error(e, |m| DatabaseError::WriteRejected(format!("Set insert failed: {}", m)))
        })
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
        let rows = self
            .query(&self.sql.sink_summary(sink), &[])
            .map_err(|e| Self::store_error(e, |m| DatabaseError::QueryFailed(format!("Query failed: {}", m))))?;

        let mut summary = Vec::with_capacity(rows.len());
        for row in &rows {
            let code: String = row
                .try_get(0)
                .map_err(|e| DatabaseError::QueryFailed(format!("Row fetch error: {}", e)))?;
            let count: i64 = row
                .try_get(1)
                .map_err(|e| DatabaseError::QueryFailed(format!("Row fetch error: {}", e)))?;
            let sum: Option<String> = row
                .try_get(2)
                .map_err(|e| DatabaseError::QueryFailed(format!("Row fetch error: {}", e)))?;
            let sum = sum.as_deref().and_then(parse_decimal).unwrap_or_default();
            summary.push(code_summary(code, count.max(0) as u64, sum));
        }
        Ok(summary)
    }

    fn sink_rows(&mut self, sink: &SinkTarget) -> DatabaseResult<Vec<SinkRow>> {
        let rows = self
            .query(&self.sql.sink_rows(sink), &[])
            .map_err(|e| Self::store_error(e, |m| DatabaseError::QueryFailed(format!("Query failed: {}", m))))?;

        rows.iter()
            .map(|row| {
                let point: Option<String> = row.try_get(2)?;
                Ok(SinkRow {
                    customer_id: row.try_get(0)?,
                    code: row.try_get(1)?,
                    credit_point: point.as_deref().and_then(parse_decimal).unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>, tokio_postgres::Error>>()
            .map_err(|e| DatabaseError::QueryFailed(format!("Row fetch error: {}", e)))
    }
}

/// Replace the password of a `user:password@host` connection URL.
fn mask_connection_string(connection_string: &str) -> String {
    if let Some(at_pos) = connection_string.find('@')
        && let Some(colon_pos) = connection_string[..at_pos].rfind(':')
        && connection_string.find("://").is_none_or(|scheme| colon_pos > scheme)
    {
        let prefix = &connection_string[..colon_pos + 1];
        let suffix = &connection_string[at_pos..];
        return format!("{}****{}", prefix, suffix);
    }
    connection_string.to_string()
}
