//! Database schema definitions and SQL text
//!
//! Provides SQL that works with both DuckDB and PostgreSQL. The only dialect
//! difference the pipeline needs is the parameter placeholder style.
//! Identifiers and literals spliced into statements are validated by
//! [`crate::validation`] before a run starts.

use std::fmt::Write as _;

use super::{ResetScope, SelectionPredicate, SinkTarget, SourceQuery};
use crate::classify::ClassificationRule;
use crate::models::OutputRecord;
use crate::validation::quote_literal;

/// Columns of the sink table, in insert order
pub const SINK_COLUMNS: &str = "yyyymm, customer_id, email, coupon_cd, credit_point, send_dt";

/// Columns of the candidate table, in insert order
pub const SOURCE_COLUMNS: &str = "id, email, credit_limit, gender, address1, address2, enroll_dt";

/// Precision of limit and reward columns
pub const DECIMAL_TYPE: &str = "DECIMAL(15,2)";

/// Database schema helper
pub struct DatabaseSchema;

impl DatabaseSchema {
    /// Get the schema creation SQL for a source/sink pair
    ///
    /// This SQL is compatible with both DuckDB and PostgreSQL.
    pub fn create_tables_sql(source_table: &str, sink_table: &str) -> String {
        format!(
            r#"
-- Candidate records
CREATE TABLE IF NOT EXISTS {source_table} (
    id VARCHAR,
    email VARCHAR,
    credit_limit {DECIMAL_TYPE},
    gender VARCHAR,
    address1 VARCHAR,
    address2 VARCHAR,
    enroll_dt TIMESTAMP
);

-- Classified output, partitioned by run-period key
CREATE TABLE IF NOT EXISTS {sink_table} (
    yyyymm VARCHAR NOT NULL,
    customer_id VARCHAR NOT NULL,
    email VARCHAR,
    coupon_cd VARCHAR NOT NULL,
    credit_point {DECIMAL_TYPE},
    send_dt TIMESTAMP
);
"#
        )
    }

    /// Get the index creation SQL
    pub fn create_indexes_sql(sink_table: &str) -> String {
        let index_name = format!("idx_{}_yyyymm", sink_table.replace('.', "_"));
        format!("CREATE INDEX IF NOT EXISTS {index_name} ON {sink_table}(yyyymm);")
    }
}

/// Parameter placeholder style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// `?` (DuckDB)
    Question,
    /// `$1`, `$2`, ... (PostgreSQL)
    Dollar,
}

impl Placeholder {
    fn render(&self, index: usize) -> String {
        match self {
            Placeholder::Question => "?".to_string(),
            Placeholder::Dollar => format!("${}", index),
        }
    }
}

/// Builds the statements a backend executes.
#[derive(Debug, Clone, Copy)]
pub struct SqlBuilder {
    placeholder: Placeholder,
}

impl SqlBuilder {
    /// Create a builder for a placeholder style.
    pub fn new(placeholder: Placeholder) -> Self {
        Self { placeholder }
    }

    /// Keyset page over the candidate table.
    ///
    /// Binds one parameter (the previous page's last identifier) when
    /// `after_id` is true.
    pub fn select_candidates(&self, query: &SourceQuery, after_id: bool, limit: usize) -> String {
        let mut sql = format!(
            "SELECT id, email, CAST(credit_limit AS VARCHAR) AS credit_limit, gender, \
             address1, address2, CAST(enroll_dt AS VARCHAR) AS enroll_dt \
             FROM {} WHERE id IS NOT NULL",
            query.table
        );
        if let Some(predicate) = &query.predicate {
            let _ = write!(sql, " AND {}", Self::predicate_sql(predicate));
        }
        if after_id {
            let _ = write!(sql, " AND id > {}", self.placeholder.render(1));
        }
        let _ = write!(sql, " ORDER BY id LIMIT {}", limit);
        sql
    }

    /// Count candidates satisfying the predicate.
    pub fn count_eligible(&self, source_table: &str, predicate: &SelectionPredicate) -> String {
        format!(
            "SELECT COUNT(*) FROM {} WHERE id IS NOT NULL AND {}",
            source_table,
            Self::predicate_sql(predicate)
        )
    }

    /// Clear prior sink rows.
    pub fn reset_sink(&self, sink: &SinkTarget, scope: ResetScope) -> String {
        match scope {
            ResetScope::Period => format!(
                "DELETE FROM {} WHERE yyyymm = {}",
                sink.table,
                quote_literal(&sink.period_key)
            ),
            ResetScope::Table => format!("DELETE FROM {}", sink.table),
        }
    }

    /// One fully materialized insert with every value inlined.
    pub fn insert_literal(&self, sink: &SinkTarget, record: &OutputRecord) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES ({}, {}, {}, {}, CAST({} AS {}), NULL)",
            sink.table,
            SINK_COLUMNS,
            quote_literal(&record.period_key),
            quote_literal(&record.customer_id),
            quote_literal(&record.email),
            quote_literal(record.code.as_str()),
            quote_literal(&record.credit_point.to_string()),
            DECIMAL_TYPE
        )
    }

    /// Parameterized insert of `rows` sink rows (five parameters per row).
    pub fn insert_sink_rows(&self, sink: &SinkTarget, rows: usize) -> String {
        let header = format!("INSERT INTO {} ({}) VALUES ", sink.table, SINK_COLUMNS);
        let mut sql = String::with_capacity(header.len() + rows * 48);
        sql.push_str(&header);

        let mut index = 0;
        for row in 0..rows {
            if row > 0 {
                sql.push_str(", ");
            }
            let mut p = || {
                index += 1;
                self.placeholder.render(index)
            };
            let (a, b, c, d, e) = (p(), p(), p(), p(), p());
            let _ = write!(sql, "({a}, {b}, {c}, {d}, CAST({e} AS {DECIMAL_TYPE}), NULL)");
        }
        sql
    }

    /// Parameterized insert of `rows` candidate rows (seven parameters per row).
    pub fn insert_candidate_rows(&self, source_table: &str, rows: usize) -> String {
        let header = format!("INSERT INTO {} ({}) VALUES ", source_table, SOURCE_COLUMNS);
        let mut sql = String::with_capacity(header.len() + rows * 64);
        sql.push_str(&header);

        let mut index = 0;
        for row in 0..rows {
            if row > 0 {
                sql.push_str(", ");
            }
            let mut p = || {
                index += 1;
                self.placeholder.render(index)
            };
            let (a, b, c, d, e, f, g) = (p(), p(), p(), p(), p(), p(), p());
            let _ = write!(
                sql,
                "({a}, {b}, CAST({c} AS {DECIMAL_TYPE}), {d}, {e}, {f}, CAST({g} AS TIMESTAMP))"
            );
        }
        sql
    }

    /// Set-based read, classify and insert.
    pub fn insert_classified(
        &self,
        source_table: &str,
        predicate: &SelectionPredicate,
        sink: &SinkTarget,
        rule: &ClassificationRule,
    ) -> String {
        format!(
            "INSERT INTO {sink_table} ({SINK_COLUMNS}) \
             SELECT {period}, id, email, coupon_cd, credit_limit, NULL FROM (\
             SELECT id, email, credit_limit, {case} AS coupon_cd \
             FROM {source_table} WHERE id IS NOT NULL AND {filter}\
             ) classified WHERE coupon_cd IS NOT NULL",
            sink_table = sink.table,
            period = quote_literal(&sink.period_key),
            case = Self::classification_case(rule),
            filter = Self::predicate_sql(predicate),
        )
    }

    /// The classification rule as a SQL `CASE` expression.
    ///
    /// Evaluates to NULL when the limit is NULL, matching the client-side
    /// classifier's `None`.
    pub fn classification_case(rule: &ClassificationRule) -> String {
        let middle = match &rule.exception {
            Some(clause) => {
                let mut condition = format!("gender = {}", quote_literal(&clause.categorical));
                let address = Self::address_sql();
                for needle in clause.effective_substrings() {
                    let _ = write!(
                        condition,
                        " AND strpos({}, {}) > 0",
                        address,
                        quote_literal(needle)
                    );
                }
                format!("CASE WHEN {} THEN 'C2' ELSE 'CC' END", condition)
            }
            None => "'CC'".to_string(),
        };

        format!(
            "CASE WHEN credit_limit < {low} THEN 'AA' \
             WHEN credit_limit < {mid} THEN 'BB' \
             WHEN credit_limit < {high} THEN {middle} \
             WHEN credit_limit >= {high} THEN 'DD' \
             ELSE NULL END",
            low = rule.low,
            mid = rule.mid,
            high = rule.high,
        )
    }

    /// Count sink rows for the period key.
    pub fn count_sink(&self, sink: &SinkTarget) -> String {
        format!(
            "SELECT COUNT(*) FROM {} WHERE yyyymm = {}",
            sink.table,
            quote_literal(&sink.period_key)
        )
    }

    /// Per-code count and exact sum of limits for the period key.
    pub fn sink_summary(&self, sink: &SinkTarget) -> String {
        format!(
            "SELECT coupon_cd, COUNT(*), CAST(SUM(credit_point) AS VARCHAR) FROM {} \
             WHERE yyyymm = {} GROUP BY coupon_cd ORDER BY coupon_cd",
            sink.table,
            quote_literal(&sink.period_key)
        )
    }

    /// Sink rows for the period key, ordered by identifier.
    pub fn sink_rows(&self, sink: &SinkTarget) -> String {
        format!(
            "SELECT customer_id, coupon_cd, CAST(credit_point AS VARCHAR) FROM {} \
             WHERE yyyymm = {} ORDER BY customer_id, coupon_cd",
            sink.table,
            quote_literal(&sink.period_key)
        )
    }

    /// SQL rendering of [`crate::classify::full_address`].
    fn address_sql() -> &'static str {
        "(COALESCE(address1, '') || CASE WHEN address2 IS NULL THEN '' ELSE ' ' || address2 END)"
    }

    fn predicate_sql(predicate: &SelectionPredicate) -> String {
        format!(
            "enroll_dt >= DATE '{}' AND email IS NOT NULL AND credit_limit IS NOT NULL",
            predicate.cutoff.format("%Y-%m-%d")
        )
    }
}
