//! Collaborator traits consumed by the manager.
//!
//! Readers for local files, object storage and the like, record framing, and
//! statement construction all live outside this crate. The manager only needs
//! the narrow surfaces below.

use async_trait::async_trait;

/// One row of string fields.
pub type Record = Vec<String>;

/// Records read in one go, plus the source bytes they were parsed from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    pub bytes: u64,
    pub records: Vec<Record>,
}

impl Batch {
    pub fn new(bytes: u64, records: Vec<Record>) -> Self {
        Self { bytes, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A byte stream with a known total size.
#[async_trait]
pub trait Source: Send {
    /// Name used in logs and errors (a path or URL).
    fn name(&self) -> String;

    async fn open(&mut self) -> anyhow::Result<()>;

    /// Total bytes the source will yield.
    async fn size(&mut self) -> anyhow::Result<u64>;

    /// Read into `buf`, returning the number of bytes read; `0` at end of data.
    async fn read(&mut self, buf: &mut [u8]) -> anyhow::Result<usize>;

    async fn close(&mut self) -> anyhow::Result<()>;
}

/// Splits a source into batches of records.
#[async_trait]
pub trait BatchRecordReader: Send {
    /// Next batch, or `None` once the source is exhausted.
    async fn read_batch(&mut self, source: &mut dyn Source) -> anyhow::Result<Option<Batch>>;
}

/// Turns a batch of records into one statement. An empty statement means
/// there is nothing to execute for this batch.
pub trait StatementBuilder: Send + Sync {
    fn build(&self, records: &[Record]) -> anyhow::Result<String>;
}

impl<F> StatementBuilder for F
where
    F: Fn(&[Record]) -> anyhow::Result<String> + Send + Sync,
{
    fn build(&self, records: &[Record]) -> anyhow::Result<String> {
        self(records)
    }
}
