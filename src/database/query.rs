//! Generic asynchronous query layer.
//!
//! A query *binding* is declared once at startup from the configured
//! SQL text, parameter slots and column names, then reused for every
//! job. Jobs execute on the connection pool; decoded rows are
//! accumulated and delivered back to the submitting session as one
//! completion event. Sessions enforce their own single in-flight job;
//! cancellation is structural because a dead session's event channel
//! simply drops the completion.

use log::{debug, warn};
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DbBackend, DbErr, QueryResult, RuntimeErr, Statement,
    TryGetable, Value,
};

/// Terminal status of a query job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Ok,
    Canceled,
    DbError,
}

/// Verdict of the per row hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowDecision {
    Keep,
    Discard,
}

/// How many kept rows a job wants before it stops decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Decode and filter the entire result set
    AllRows,
    /// Stop after the first kept row
    FirstKept,
}

/// A typed query binding. `prepare` runs before any SQL and may veto
/// the whole job; `decode_row` and `keep_row` run per result row.
pub trait QueryDef: Send + Sync + Sized + 'static {
    type Input: Send + 'static;
    type Row: Send + 'static;

    /// Binding name used in log records
    const NAME: &'static str;

    /// Whether the binding is enabled in configuration
    fn enabled(&self) -> bool;

    /// Builds the statement for the job, storing any derived values
    /// back into the input. Returning `None` vetoes the job: no SQL
    /// runs and the outcome is `Ok` with zero rows.
    fn prepare(&self, backend: DbBackend, input: &mut Self::Input) -> Option<Statement>;

    /// Decodes one result row through the configured column names
    fn decode_row(&self, input: &Self::Input, row: &QueryResult) -> Result<Self::Row, DbErr>;

    /// Per row acceptance hook; discarded rows never reach the caller
    fn keep_row(&self, _input: &Self::Input, _row: &Self::Row) -> RowDecision {
        RowDecision::Keep
    }

    fn fetch_mode(&self) -> FetchMode {
        FetchMode::AllRows
    }
}

/// Completed job: status, the kept row batch, and the input handed
/// back so the caller can reuse what it submitted
pub struct QueryOutcome<D: QueryDef> {
    pub status: QueryStatus,
    pub rows: Vec<D::Row>,
    pub input: D::Input,
}

/// Outcome for a job whose submitting session died before execution;
/// no SQL runs and the completion is a no-op for the caller
pub fn canceled<D: QueryDef>(input: D::Input) -> QueryOutcome<D> {
    QueryOutcome {
        status: QueryStatus::Canceled,
        rows: Vec::new(),
        input,
    }
}

/// Runs one job for the binding, accumulating the kept rows
pub async fn run<D: QueryDef>(
    def: &D,
    db: &DatabaseConnection,
    mut input: D::Input,
) -> QueryOutcome<D> {
    if !def.enabled() {
        warn!("Query {} is disabled in configuration", D::NAME);
        return QueryOutcome {
            status: QueryStatus::DbError,
            rows: Vec::new(),
            input,
        };
    }

    let statement = match def.prepare(db.get_database_backend(), &mut input) {
        Some(value) => value,
        None => {
            debug!("Query {} vetoed before execution", D::NAME);
            return QueryOutcome {
                status: QueryStatus::Ok,
                rows: Vec::new(),
                input,
            };
        }
    };

    let results = match db.query_all(statement).await {
        Ok(value) => value,
        Err(err) => {
            warn!("Query {} failed: {err}", D::NAME);
            return QueryOutcome {
                status: QueryStatus::DbError,
                rows: Vec::new(),
                input,
            };
        }
    };

    let mut rows = Vec::new();
    for result in &results {
        let row = match def.decode_row(&input, result) {
            Ok(value) => value,
            Err(err) => {
                warn!("Query {} row decode failed: {err}", D::NAME);
                return QueryOutcome {
                    status: QueryStatus::DbError,
                    rows: Vec::new(),
                    input,
                };
            }
        };

        if let RowDecision::Keep = def.keep_row(&input, &row) {
            rows.push(row);
            if def.fetch_mode() == FetchMode::FirstKept {
                break;
            }
        }
    }

    QueryOutcome {
        status: QueryStatus::Ok,
        rows,
        input,
    }
}

/// Executes a statement that produces no result rows, logging failures.
/// Used for fire-and-forget updates.
pub async fn execute_no_result(name: &'static str, db: DatabaseConnection, statement: Statement) {
    if let Err(err) = db.execute(statement).await {
        warn!("Update {name} failed: {err}");
    }
}

/// Whether a decode error means the row simply has no such column, as
/// opposed to a value the driver could not decode
fn is_missing_column(err: &DbErr) -> bool {
    matches!(
        err,
        DbErr::Query(RuntimeErr::SqlxError(sqlx::Error::ColumnNotFound(_)))
    )
}

/// Reads a column that retargeted schemas may legitimately omit. The
/// default applies only when the column is absent from the row; a
/// present column that fails to decode is a real error and propagates.
pub fn optional_column<T>(row: &QueryResult, column: &str, default: T) -> Result<T, DbErr>
where
    T: TryGetable,
{
    match row.try_get_by(column) {
        Ok(value) => Ok(value),
        Err(err) if is_missing_column(&err) => Ok(default),
        Err(err) => Err(err),
    }
}

/// Orders `(slot, value)` pairs into the positional parameter vector
/// for a statement. Slots are 1-based; slot 0 leaves the parameter
/// unbound, letting operators drop parameters their query doesn't use.
pub fn positional_values(slots: Vec<(u32, Value)>) -> Vec<Value> {
    let mut slots: Vec<(u32, Value)> = slots
        .into_iter()
        .filter(|(slot, _)| *slot > 0)
        .collect();
    slots.sort_by_key(|(slot, _)| *slot);
    slots.into_iter().map(|(_, value)| value).collect()
}

#[cfg(test)]
mod test {
    use super::{is_missing_column, positional_values};
    use sea_orm::{DbErr, RuntimeErr, Value};

    /// Tests slots order the parameters and slot zero drops them
    #[test]
    fn test_positional_values() {
        let values = positional_values(vec![
            (2, Value::from("alice")),
            (1, Value::from("digest")),
            (0, Value::from("dropped")),
        ]);
        assert_eq!(
            values,
            vec![Value::from("digest"), Value::from("alice")]
        );
    }

    /// Tests only absent-column errors are classified as missing;
    /// decode failures stay errors
    #[test]
    fn test_missing_column_classifier() {
        let missing = DbErr::Query(RuntimeErr::SqlxError(sqlx::Error::ColumnNotFound(
            "password".to_string(),
        )));
        assert!(is_missing_column(&missing));

        assert!(!is_missing_column(&DbErr::Type("not a string".to_string())));
        assert!(!is_missing_column(&DbErr::Query(RuntimeErr::Internal(
            "connection reset".to_string(),
        ))));
    }
}
