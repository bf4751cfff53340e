//! SQLite queries per value.

use crate::pipeline::{Emitter, ItemHandler, StageOptions};
use async_trait::async_trait;
use micropipe_shared::{FlowValue, MetaData, PipelineError, PipelineResult};
use rusqlite::types::Value;
use rusqlite::{Connection, Row, params_from_iter};
use std::fmt::Debug;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

macro_rules! db_err {
    ($result:expr) => {
        $result.map_err(|e| PipelineError::Database(e.to_string()))
    };
}

/// A statement and the parameters it is run with.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub sql: String,
    pub params: SqlParams,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum SqlParams {
    #[default]
    None,
    /// One parameter set, bound positionally.
    Single(Vec<Value>),
    /// The statement is run once per set, inside one transaction. Yields no
    /// rows.
    Many(Vec<Vec<Value>>),
}

impl SqlQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: SqlParams::None,
        }
    }

    /// Append a positional parameter.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        match &mut self.params {
            SqlParams::Single(values) => values.push(value.into()),
            _ => self.params = SqlParams::Single(vec![value.into()]),
        }
        self
    }

    pub fn many(sql: impl Into<String>, sets: Vec<Vec<Value>>) -> Self {
        Self {
            sql: sql.into(),
            params: SqlParams::Many(sets),
        }
    }
}

impl From<&str> for SqlQuery {
    fn from(sql: &str) -> Self {
        SqlQuery::new(sql)
    }
}

impl From<String> for SqlQuery {
    fn from(sql: String) -> Self {
        SqlQuery::new(sql)
    }
}

/// How the rows of one query leave a [`SqliteQuery`] stage.
pub trait RowFlow: Send + Sync + 'static {
    type Emit<T: Send + 'static>: Send + 'static;

    fn split<T: Send + 'static>(rows: Vec<T>) -> Vec<Self::Emit<T>>;
}

/// Every row is its own value.
#[derive(Debug, Clone, Copy, Default)]
pub struct EachRow;

/// All rows of a query travel as one value, possibly empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllRows;

impl RowFlow for EachRow {
    type Emit<T: Send + 'static> = T;

    fn split<T: Send + 'static>(rows: Vec<T>) -> Vec<T> {
        rows
    }
}

impl RowFlow for AllRows {
    type Emit<T: Send + 'static> = Vec<T>;

    fn split<T: Send + 'static>(rows: Vec<T>) -> Vec<Vec<T>> {
        vec![rows]
    }
}

type RowMapper<T> = dyn Fn(&Row<'_>) -> rusqlite::Result<T> + Send + Sync;

/// Runs one query per value against a SQLite database file.
///
/// The query is built from the value; each result row is turned into a `T`
/// by the row mapper. Emitted values start with empty metadata, or whatever
/// the metadata function derives. The database is opened per value on the
/// blocking pool, so concurrent values do not share a connection.
pub struct SqliteQuery<I, T: Send + 'static, Q, F: RowFlow = EachRow> {
    database: PathBuf,
    query: Q,
    map_row: Arc<RowMapper<T>>,
    options: StageOptions<F::Emit<T>>,
    _flow: PhantomData<fn(I) -> F>,
}

impl<I, T, Q> SqliteQuery<I, T, Q, EachRow>
where
    T: Send + 'static,
    Q: Fn(&FlowValue<I>) -> SqlQuery,
{
    pub fn new<M>(database: impl Into<PathBuf>, query: Q, map_row: M) -> Self
    where
        M: Fn(&Row<'_>) -> rusqlite::Result<T> + Send + Sync + 'static,
    {
        Self {
            database: database.into(),
            query,
            map_row: Arc::new(map_row),
            options: StageOptions::default(),
            _flow: PhantomData,
        }
    }

    /// Emit each query's rows together as one `Vec<T>`.
    ///
    /// A metadata function set before this call is dropped; set it afterwards.
    pub fn all_rows(self) -> SqliteQuery<I, T, Q, AllRows> {
        SqliteQuery {
            database: self.database,
            query: self.query,
            map_row: self.map_row,
            options: StageOptions {
                name: self.options.name,
                output_capacity: self.options.output_capacity,
                meta_func: None,
            },
            _flow: PhantomData,
        }
    }
}

fn run_query<T>(
    database: PathBuf,
    query: SqlQuery,
    map_row: &RowMapper<T>,
) -> PipelineResult<Vec<T>> {
    let mut conn = db_err!(Connection::open(&database))?;
    db_err!(conn.busy_timeout(BUSY_TIMEOUT))?;

    let values = match query.params {
        SqlParams::Many(sets) => {
            let tx = db_err!(conn.transaction())?;
            {
                let mut stmt = db_err!(tx.prepare(&query.sql))?;
                for set in sets {
                    db_err!(stmt.execute(params_from_iter(set)))?;
                }
            }
            db_err!(tx.commit())?;
            return Ok(Vec::new());
        }
        SqlParams::Single(values) => values,
        SqlParams::None => Vec::new(),
    };

    let mut stmt = db_err!(conn.prepare(&query.sql))?;
    let rows = db_err!(stmt.query_map(params_from_iter(values), |row| map_row(row)))?;
    db_err!(rows.collect::<rusqlite::Result<Vec<T>>>())
}

#[async_trait]
impl<I, T, Q, F> ItemHandler for SqliteQuery<I, T, Q, F>
where
    I: Debug + Send + Sync + 'static,
    T: Send + 'static,
    Q: Fn(&FlowValue<I>) -> SqlQuery + Send + Sync + 'static,
    F: RowFlow,
{
    type Input = I;
    type Output = F::Emit<T>;

    fn kind(&self) -> &'static str {
        "SqliteQuery"
    }

    fn options(&self) -> &StageOptions<F::Emit<T>> {
        &self.options
    }

    fn options_mut(&mut self) -> &mut StageOptions<F::Emit<T>> {
        &mut self.options
    }

    async fn handle(&self, item: &FlowValue<I>, out: &Emitter<F::Emit<T>>) -> PipelineResult<bool> {
        let query = (self.query)(item);
        let database = self.database.clone();
        let map_row = Arc::clone(&self.map_row);

        let rows = tokio::task::spawn_blocking(move || run_query(database, query, &*map_row))
            .await
            .map_err(|e| PipelineError::Internal(format!("query task failed: {}", e)))??;

        for value in F::split(rows) {
            out.emit(value, MetaData::new()).await?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Pipeline, StageExt};
    use serde_json::json;
    use tempfile::TempDir;

    fn scores_db(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("scores.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "
            CREATE TABLE scores (team TEXT NOT NULL, player TEXT NOT NULL, points INTEGER NOT NULL);
            INSERT INTO scores VALUES ('red', 'ana', 12);
            INSERT INTO scores VALUES ('red', 'bo', 7);
            INSERT INTO scores VALUES ('blue', 'cy', 9);
            ",
        )
        .unwrap();
        path
    }

    fn by_team(v: &FlowValue<&'static str>) -> SqlQuery {
        SqlQuery::new("SELECT player, points FROM scores WHERE team = ?1 ORDER BY player")
            .bind(v.value.to_string())
    }

    fn player(row: &Row<'_>) -> rusqlite::Result<(String, i64)> {
        Ok((row.get(0)?, row.get(1)?))
    }

    #[test]
    fn test_bind_collects_positional_params() {
        let query = SqlQuery::new("SELECT ?1, ?2").bind(1i64).bind("two".to_string());
        assert_eq!(
            query.params,
            SqlParams::Single(vec![Value::Integer(1), Value::Text("two".into())])
        );
        assert_eq!(SqlQuery::from("SELECT 1").params, SqlParams::None);
    }

    #[tokio::test]
    async fn test_each_row_is_emitted() {
        let dir = TempDir::new().unwrap();
        let stage = SqliteQuery::new(scores_db(&dir), by_team, player);

        let run = Pipeline::builder()
            .pipe(stage)
            .build()
            .unwrap()
            .pump(vec!["red", "blue", "green"])
            .await;

        let mut rows = run.into_values();
        rows.sort();
        assert_eq!(
            rows,
            vec![
                ("ana".to_string(), 12),
                ("bo".to_string(), 7),
                ("cy".to_string(), 9)
            ]
        );
    }

    #[tokio::test]
    async fn test_all_rows_emitted_together() {
        let dir = TempDir::new().unwrap();
        let stage = SqliteQuery::new(scores_db(&dir), by_team, player)
            .all_rows()
            .with_meta_func(|rows: &Vec<(String, i64)>, mut meta| {
                meta.insert("count".into(), json!(rows.len()));
                meta
            });

        let run = Pipeline::builder()
            .pipe(stage)
            .build()
            .unwrap()
            .pump(vec!["red", "green"])
            .await;

        let mut counts: Vec<u64> = run
            .values
            .iter()
            .map(|v| v.meta["count"].as_u64().unwrap())
            .collect();
        counts.sort_unstable();
        assert_eq!(counts, vec![0, 2]);
        let red = run.values.iter().find(|v| !v.value.is_empty()).unwrap();
        assert_eq!(red.value[0], ("ana".to_string(), 12));
    }

    #[tokio::test]
    async fn test_many_param_sets_are_written() {
        let dir = TempDir::new().unwrap();
        let path = scores_db(&dir);
        let insert = SqliteQuery::new(
            path.clone(),
            |v: &FlowValue<Vec<(&'static str, i64)>>| {
                let sets = v
                    .value
                    .iter()
                    .map(|(player, points)| {
                        vec![
                            Value::from("green".to_string()),
                            Value::from(player.to_string()),
                            Value::from(*points),
                        ]
                    })
                    .collect();
                SqlQuery::many("INSERT INTO scores VALUES (?1, ?2, ?3)", sets)
            },
            player,
        );

        let run = Pipeline::builder()
            .pipe(insert)
            .build()
            .unwrap()
            .pump(vec![vec![("dee", 3), ("eli", 4)]])
            .await;

        assert!(run.values.is_empty());
        assert!(run.lost.is_empty());
        let conn = Connection::open(&path).unwrap();
        let total: i64 = conn
            .query_row("SELECT SUM(points) FROM scores WHERE team = 'green'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(total, 7);
    }

    #[tokio::test]
    async fn test_bad_query_loses_value() {
        let dir = TempDir::new().unwrap();
        let stage = SqliteQuery::new(
            scores_db(&dir),
            |_: &FlowValue<u8>| SqlQuery::new("SELECT nothing FROM nowhere"),
            |row: &Row<'_>| row.get::<_, i64>(0),
        );

        let run = Pipeline::builder()
            .pipe(stage)
            .build()
            .unwrap()
            .pump(vec![1u8])
            .await;

        assert!(run.values.is_empty());
        assert_eq!(run.lost.len(), 1);
        assert!(run.lost[0].reason.contains("database error"));
    }
}
