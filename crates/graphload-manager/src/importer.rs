//! Importers: one batch of records in, one executed statement out.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use graphload_client::Pool;
use graphload_core::CountingBarrier;

use crate::source::{Record, StatementBuilder};

/// Timing of one successful import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportResult {
    /// Server-side latency.
    pub latency: Duration,
    /// Client-observed round trip.
    pub resp_time: Duration,
}

/// A failed import, with whatever context is known where it surfaced.
///
/// Importers fill in the statement; the manager adds graph and source names
/// before logging.
#[derive(Debug)]
pub struct ImportError {
    pub graph: Option<String>,
    pub source_name: Option<String>,
    pub statement: Option<String>,
    pub cause: anyhow::Error,
}

impl ImportError {
    pub fn new(cause: impl Into<anyhow::Error>) -> Self {
        Self {
            graph: None,
            source_name: None,
            statement: None,
            cause: cause.into(),
        }
    }

    pub fn with_statement(mut self, statement: impl Into<String>) -> Self {
        self.statement = Some(statement.into());
        self
    }

    pub fn with_graph(mut self, graph: impl Into<String>) -> Self {
        self.graph = Some(graph.into());
        self
    }

    pub fn with_source(mut self, source_name: impl Into<String>) -> Self {
        self.source_name = Some(source_name.into());
        self
    }
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "import failed")?;
        if let Some(graph) = &self.graph {
            write!(f, " (graph {graph})")?;
        }
        if let Some(source) = &self.source_name {
            write!(f, " (source {source})")?;
        }
        write!(f, ": {}", self.cause)
    }
}

impl std::error::Error for ImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.cause)
    }
}

/// Executes batches of records against the database.
///
/// `add`, `done` and `wait` form an optional cross-pipeline barrier: the
/// manager calls `add` once per registered pipeline, `done` when that
/// pipeline finished importing, and `wait` before a pipeline starts reading.
/// The defaults do nothing.
#[async_trait]
pub trait Importer: Send + Sync {
    async fn import(&self, records: &[Record]) -> Result<ImportResult, ImportError>;

    fn add(&self, _n: usize) {}

    fn done(&self) {}

    async fn wait(&self) {}
}

/// Builds a statement from each batch and runs it on the pool.
pub struct StatementImporter {
    builder: Arc<dyn StatementBuilder>,
    pool: Arc<Pool>,
    tracked_by: Option<Arc<CountingBarrier>>,
    waits_for: Vec<Arc<CountingBarrier>>,
}

impl StatementImporter {
    pub fn new(builder: Arc<dyn StatementBuilder>, pool: Arc<Pool>) -> Self {
        Self {
            builder,
            pool,
            tracked_by: None,
            waits_for: Vec::new(),
        }
    }

    /// Count this importer's pipelines on `barrier`.
    pub fn tracked_by(mut self, barrier: Arc<CountingBarrier>) -> Self {
        self.tracked_by = Some(barrier);
        self
    }

    /// Hold back pipelines using this importer until `barrier` drains.
    /// Edge importers wait on the barrier that tracks node importers.
    pub fn waits_for(mut self, barrier: Arc<CountingBarrier>) -> Self {
        self.waits_for.push(barrier);
        self
    }
}

#[async_trait]
impl Importer for StatementImporter {
    async fn import(&self, records: &[Record]) -> Result<ImportResult, ImportError> {
        let statement = self.builder.build(records).map_err(ImportError::new)?;
        if statement.is_empty() {
            return Ok(ImportResult::default());
        }

        let resp = self
            .pool
            .execute(&statement)
            .await
            .map_err(|e| ImportError::new(e).with_statement(statement.as_str()))?;
        if !resp.is_succeed() {
            let message = resp
                .error()
                .unwrap_or_else(|| "statement did not succeed".to_string());
            return Err(ImportError::new(anyhow::anyhow!(message)).with_statement(statement));
        }

        Ok(ImportResult {
            latency: resp.latency(),
            resp_time: resp.resp_time(),
        })
    }

    fn add(&self, n: usize) {
        if let Some(barrier) = &self.tracked_by {
            barrier.add(n);
        }
    }

    fn done(&self) {
        if let Some(barrier) = &self.tracked_by {
            barrier.done();
        }
    }

    async fn wait(&self) {
        for barrier in &self.waits_for {
            tracing::debug!(barrier = barrier.name(), "waiting for barrier");
            barrier.wait().await;
        }
    }
}

impl fmt::Debug for StatementImporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementImporter")
            .field("tracked_by", &self.tracked_by.as_ref().map(|b| b.name()))
            .field(
                "waits_for",
                &self.waits_for.iter().map(|b| b.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphload_client::mock::{MockResponse, MockServer};
    use graphload_client::Options;
    use graphload_core::Address;

    fn records(n: usize) -> Vec<Record> {
        (0..n).map(|i| vec![i.to_string(), format!("name-{i}")]).collect()
    }

    fn insert_builder() -> Arc<dyn StatementBuilder> {
        Arc::new(|records: &[Record]| -> anyhow::Result<String> {
            if records.is_empty() {
                return Ok(String::new());
            }
            let values: Vec<String> = records
                .iter()
                .map(|r| format!("{}:(\"{}\")", r[0], r[1]))
                .collect();
            Ok(format!("INSERT VERTEX person(name) VALUES {}", values.join(", ")))
        })
    }

    async fn open_pool(server: &MockServer) -> Arc<Pool> {
        let options = Options::new(vec![Address::new("graphd", 9669)], server.factory())
            .with_concurrency_per_address(1)
            .with_retry(0);
        let pool = Arc::new(Pool::new(options));
        pool.open().await.unwrap();
        pool
    }

    #[tokio::test]
    async fn successful_import_reports_timing() {
        let server = MockServer::new();
        let pool = open_pool(&server).await;
        let importer = StatementImporter::new(insert_builder(), Arc::clone(&pool));

        let result = importer.import(&records(2)).await.unwrap();
        assert_eq!(result.latency, Duration::from_millis(1));
        assert_eq!(result.resp_time, Duration::from_millis(2));
        assert_eq!(
            server.statements(),
            vec![r#"INSERT VERTEX person(name) VALUES 0:("name-0"), 1:("name-1")"#.to_string()]
        );
        pool.close().await;
    }

    #[tokio::test]
    async fn empty_statement_is_a_no_op() {
        let server = MockServer::new();
        let pool = open_pool(&server).await;
        let importer = StatementImporter::new(insert_builder(), Arc::clone(&pool));

        let result = importer.import(&[]).await.unwrap();
        assert_eq!(result, ImportResult::default());
        assert_eq!(server.executes(), 0);
        pool.close().await;
    }

    #[tokio::test]
    async fn build_failure_is_returned() {
        let server = MockServer::new();
        let pool = open_pool(&server).await;
        let builder: Arc<dyn StatementBuilder> = Arc::new(|_: &[Record]| -> anyhow::Result<String> {
            anyhow::bail!("column 3 out of range")
        });
        let importer = StatementImporter::new(builder, Arc::clone(&pool));

        let err = importer.import(&records(1)).await.unwrap_err();
        assert!(err.statement.is_none());
        assert!(err.to_string().contains("column 3 out of range"));
        assert_eq!(server.executes(), 0);
        pool.close().await;
    }

    #[tokio::test]
    async fn failed_response_carries_statement() {
        let server = MockServer::with_responder(|_, _| Ok(MockResponse::permanent("SemanticError")));
        let pool = open_pool(&server).await;
        let importer = StatementImporter::new(insert_builder(), Arc::clone(&pool));

        let err = importer
            .import(&records(1))
            .await
            .unwrap_err()
            .with_graph("basic")
            .with_source("person.csv");
        assert_eq!(
            err.statement.as_deref(),
            Some(r#"INSERT VERTEX person(name) VALUES 0:("name-0")"#)
        );
        assert_eq!(
            err.to_string(),
            "import failed (graph basic) (source person.csv): SemanticError"
        );
        pool.close().await;
    }

    #[tokio::test]
    async fn transport_failure_carries_statement() {
        let server = MockServer::with_responder(|_, _| Err(anyhow::anyhow!("broken pipe")));
        let pool = open_pool(&server).await;
        let importer = StatementImporter::new(insert_builder(), Arc::clone(&pool));

        let err = importer.import(&records(1)).await.unwrap_err();
        assert!(err.statement.is_some());
        assert!(err.to_string().contains("broken pipe"));
        pool.close().await;
    }

    #[tokio::test]
    async fn barrier_wiring() {
        let server = MockServer::new();
        let pool = open_pool(&server).await;
        let nodes = CountingBarrier::shared("nodes");

        let node_importer = StatementImporter::new(insert_builder(), Arc::clone(&pool))
            .tracked_by(Arc::clone(&nodes));
        let edge_importer = StatementImporter::new(insert_builder(), Arc::clone(&pool))
            .waits_for(Arc::clone(&nodes));

        node_importer.add(1);
        assert_eq!(nodes.count(), 1);

        let waiting = tokio::spawn(async move { edge_importer.wait().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        node_importer.done();
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .expect("edge importer should be released")
            .unwrap();
        pool.close().await;
    }

    #[tokio::test]
    async fn unwired_barrier_is_a_no_op() {
        let server = MockServer::new();
        let pool = open_pool(&server).await;
        let importer = StatementImporter::new(insert_builder(), Arc::clone(&pool));
        importer.add(3);
        importer.done();
        tokio::time::timeout(Duration::from_millis(50), importer.wait())
            .await
            .expect("unwired importer never blocks");
        pool.close().await;
    }
}
