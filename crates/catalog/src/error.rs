use thiserror::Error;

use mdbridge_model::Category;

/// Buffered records for one partition that never reached storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LostRecords {
    pub category: Category,
    pub key: String,
    pub records: u64,
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("catalog is closed")]
    Closed,

    #[error("catalog unavailable: {0}")]
    Unavailable(String),

    /// Close could not persist buffered rows; they are gone.
    #[error(
        "{} buffered records in {} partitions not persisted: {source}",
        .lost.iter().map(|l| l.records).sum::<u64>(),
        .lost.len()
    )]
    Unflushed {
        lost: Vec<LostRecords>,
        #[source]
        source: Box<CatalogError>,
    },
}
