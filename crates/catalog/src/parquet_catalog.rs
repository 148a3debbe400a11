use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use parquet::file::reader::{FileReader, SerializedFileReader};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use mdbridge_model::{Category, MarketEvent};

use crate::error::{CatalogError, LostRecords};
use crate::schema;
use crate::traits::{Catalog, CategoryDescriptor, WriteMode};

const DATA_DIR: &str = "data";
const UPSERT_FILE: &str = "instrument.parquet";

/// Rows buffered for one (category, key) partition.
struct PartitionBuffer {
    dir: PathBuf,
    records: Vec<MarketEvent>,
    next_part: u64,
}

impl PartitionBuffer {
    fn open(dir: PathBuf) -> Self {
        let next_part = next_part_number(&dir);
        Self {
            dir,
            records: Vec::new(),
            next_part,
        }
    }
}

/// Parquet catalog laid out as `{root}/data/{category}/{key}/part-NNNNNN.parquet`.
///
/// Append writes are buffered per partition and written out as a new part
/// file once `flush_rows` records are pending, or on `flush()`/`close()`.
/// A failed flush keeps the rows for the next attempt. Rows still buffered
/// when `close()` gives up are reported in `CatalogError::Unflushed`.
/// Upserts replace `{key}/instrument.parquet` in one atomic rename.
pub struct ParquetCatalog {
    root: PathBuf,
    flush_rows: usize,
    buffers: Mutex<HashMap<(Category, String), PartitionBuffer>>,
    closed: AtomicBool,
}

impl ParquetCatalog {
    /// Open (creating if needed) a catalog rooted at `root`.
    pub fn new(root: impl Into<PathBuf>, flush_rows: usize) -> Result<Self, CatalogError> {
        let root = root.into();
        fs::create_dir_all(root.join(DATA_DIR))?;
        info!(path = %root.display(), flush_rows, "Opened parquet catalog");
        Ok(Self {
            root,
            flush_rows: flush_rows.max(1),
            buffers: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition_dir(&self, category: Category, key: &str) -> PathBuf {
        self.root
            .join(DATA_DIR)
            .join(category.as_str())
            .join(key)
    }

    /// Records waiting in memory across all partitions
    pub async fn pending_records(&self) -> usize {
        let buffers = self.buffers.lock().await;
        buffers.values().map(|b| b.records.len()).sum()
    }

    fn append(
        &self,
        buffers: &mut HashMap<(Category, String), PartitionBuffer>,
        record: &MarketEvent,
    ) -> Result<(), CatalogError> {
        schema::validate(record)?;
        let category = record.category();
        let key = record.key();
        let buffer = buffers
            .entry((category, key.clone()))
            .or_insert_with(|| PartitionBuffer::open(self.partition_dir(category, &key)));

        buffer.records.push(record.clone());
        if buffer.records.len() < self.flush_rows {
            return Ok(());
        }

        if let Err(e) = write_part(category, buffer) {
            // Drop the record that triggered the flush so the caller's failure
            // accounting matches what is retained; earlier rows stay for retry.
            buffer.records.pop();
            return Err(e);
        }
        Ok(())
    }

    fn upsert(&self, record: &MarketEvent) -> Result<(), CatalogError> {
        schema::validate(record)?;
        let category = record.category();
        let dir = self.partition_dir(category, &record.key());
        fs::create_dir_all(&dir)?;

        let batch = schema::to_record_batch(category, std::slice::from_ref(record))?;
        let final_path = dir.join(UPSERT_FILE);
        let tmp_path = dir.join(format!("{}.tmp", UPSERT_FILE));
        write_batch(&tmp_path, &batch)?;

        // Atomic rename from .tmp to final name
        fs::rename(&tmp_path, &final_path)?;
        debug!(path = %final_path.display(), "Upserted record");
        Ok(())
    }

    /// Empty every buffer, returning what each held.
    async fn discard_buffers(&self) -> Vec<LostRecords> {
        let mut buffers = self.buffers.lock().await;
        let mut lost: Vec<LostRecords> = buffers
            .iter_mut()
            .filter(|(_, buffer)| !buffer.records.is_empty())
            .map(|((category, key), buffer)| {
                let records = buffer.records.len() as u64;
                buffer.records.clear();
                LostRecords {
                    category: *category,
                    key: key.clone(),
                    records,
                }
            })
            .collect();
        lost.sort_by(|a, b| (a.category, &a.key).cmp(&(b.category, &b.key)));
        lost
    }
}

#[async_trait]
impl Catalog for ParquetCatalog {
    async fn write(&self, records: &[MarketEvent], mode: WriteMode) -> Result<(), CatalogError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CatalogError::Closed);
        }

        let mut buffers = self.buffers.lock().await;
        for record in records {
            match mode {
                WriteMode::Append => self.append(&mut buffers, record)?,
                WriteMode::Upsert => self.upsert(record)?,
            }
        }
        Ok(())
    }

    async fn list_categories(&self) -> Result<Vec<CategoryDescriptor>, CatalogError> {
        let data_dir = self.root.join(DATA_DIR);
        let mut inventory = Vec::new();

        for category in Category::ALL {
            let category_dir = data_dir.join(category.as_str());
            if !category_dir.is_dir() {
                continue;
            }

            let mut descriptor = CategoryDescriptor {
                category,
                partitions: Vec::new(),
                files: 0,
                bytes: 0,
                records: 0,
            };

            for entry in fs::read_dir(&category_dir)? {
                let entry = entry?;
                if !entry.file_type()?.is_dir() {
                    continue;
                }
                let files = parquet_files(&entry.path())?;
                if files.is_empty() {
                    continue;
                }
                for path in &files {
                    descriptor.bytes += fs::metadata(path)?.len();
                    descriptor.records += row_count(path)?;
                }
                descriptor.files += files.len();
                descriptor
                    .partitions
                    .push(entry.file_name().to_string_lossy().into_owned());
            }

            if !descriptor.partitions.is_empty() {
                descriptor.partitions.sort();
                inventory.push(descriptor);
            }
        }

        Ok(inventory)
    }

    async fn flush(&self) -> Result<(), CatalogError> {
        let mut buffers = self.buffers.lock().await;
        let mut first_error = None;

        for ((category, key), buffer) in buffers.iter_mut() {
            if buffer.records.is_empty() {
                continue;
            }
            if let Err(e) = write_part(*category, buffer) {
                warn!(category = %category, key = %key, error = %e, "Failed to flush partition");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn close(&self) -> Result<(), CatalogError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let Err(source) = self.flush().await else {
            info!(path = %self.root.display(), "Closed parquet catalog");
            return Ok(());
        };

        let lost = self.discard_buffers().await;
        if lost.is_empty() {
            return Err(source);
        }
        for entry in &lost {
            error!(
                category = %entry.category,
                key = %entry.key,
                records = entry.records,
                "Buffered records lost on close"
            );
        }
        Err(CatalogError::Unflushed {
            lost,
            source: Box::new(source),
        })
    }
}

fn part_file_name(n: u64) -> String {
    format!("part-{:06}.parquet", n)
}

/// One past the highest existing part number in `dir`.
fn next_part_number(dir: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            name.strip_prefix("part-")?
                .strip_suffix(".parquet")?
                .parse::<u64>()
                .ok()
        })
        .max()
        .map_or(0, |n| n + 1)
}

fn parquet_files(dir: &Path) -> Result<Vec<PathBuf>, CatalogError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "parquet") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn row_count(path: &Path) -> Result<u64, CatalogError> {
    let reader = SerializedFileReader::new(File::open(path)?)?;
    Ok(reader.metadata().file_metadata().num_rows().max(0) as u64)
}

/// Write the partition's buffered rows as the next part file and clear the buffer.
fn write_part(category: Category, buffer: &mut PartitionBuffer) -> Result<(), CatalogError> {
    let batch = schema::to_record_batch(category, &buffer.records)?;
    if batch.num_rows() > 0 {
        fs::create_dir_all(&buffer.dir)?;
        let filename = part_file_name(buffer.next_part);
        let tmp_path = buffer.dir.join(format!("{}.tmp", filename));
        let final_path = buffer.dir.join(&filename);

        write_batch(&tmp_path, &batch)?;
        fs::rename(&tmp_path, &final_path)?;
        buffer.next_part += 1;

        info!(
            category = %category,
            file = %final_path.display(),
            records = batch.num_rows(),
            "Flushed parquet file"
        );
    }
    buffer.records.clear();
    Ok(())
}

fn write_batch(path: &Path, batch: &arrow::record_batch::RecordBatch) -> Result<(), CatalogError> {
    let file = File::create(path)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_statistics_enabled(EnabledStatistics::Chunk)
        .set_created_by("mdbridge".to_string())
        .build();

    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::*;
    use arrow::record_batch::RecordBatch;
    use mdbridge_model::{BookType, ContractType, InstrumentInfo, OrderBookDeltas, QuoteTick};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    const ADA: &str = "ADAUSDT-PERP.BINANCE";

    fn quote(instrument: &str, ts: u64) -> MarketEvent {
        MarketEvent::Quote(QuoteTick {
            instrument_id: instrument.parse().unwrap(),
            bid_price: Decimal::new(3501, 4),
            ask_price: Decimal::new(3502, 4),
            bid_size: Decimal::new(1000, 0),
            ask_size: Decimal::new(900, 0),
            ts_event: ts,
            ts_init: ts + 1,
        })
    }

    fn instrument(price_precision: u8) -> MarketEvent {
        MarketEvent::Instrument(InstrumentInfo {
            instrument_id: ADA.parse().unwrap(),
            raw_symbol: "ADAUSDT".to_string(),
            contract_type: ContractType::Perpetual,
            base_currency: "ADA".to_string(),
            quote_currency: "USDT".to_string(),
            price_precision,
            size_precision: 0,
            tick_size: Decimal::new(1, 4),
            step_size: Decimal::ONE,
            ts_init: 1,
        })
    }

    fn read_batches(path: &Path) -> Vec<RecordBatch> {
        let file = File::open(path).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap();
        reader.collect::<Result<_, _>>().unwrap()
    }

    fn quote_dir(tmp: &TempDir, key: &str) -> PathBuf {
        tmp.path().join("data").join("quote_tick").join(key)
    }

    #[tokio::test]
    async fn test_append_buffers_until_flush() {
        let tmp = TempDir::new().unwrap();
        let catalog = ParquetCatalog::new(tmp.path(), 100).unwrap();

        for ts in 0..3 {
            catalog.write(&[quote(ADA, ts)], WriteMode::Append).await.unwrap();
        }
        assert_eq!(catalog.pending_records().await, 3);
        assert!(!quote_dir(&tmp, ADA).join("part-000000.parquet").exists());

        catalog.flush().await.unwrap();
        assert_eq!(catalog.pending_records().await, 0);

        let batches = read_batches(&quote_dir(&tmp, ADA).join("part-000000.parquet"));
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].num_rows(), 3);

        let ids = batches[0]
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(ids.value(2), ADA);
    }

    #[tokio::test]
    async fn test_flush_rows_threshold_writes_parts() {
        let tmp = TempDir::new().unwrap();
        let catalog = ParquetCatalog::new(tmp.path(), 2).unwrap();

        for ts in 0..5 {
            catalog.write(&[quote(ADA, ts)], WriteMode::Append).await.unwrap();
        }

        let dir = quote_dir(&tmp, ADA);
        assert!(dir.join("part-000000.parquet").exists());
        assert!(dir.join("part-000001.parquet").exists());
        assert!(!dir.join("part-000002.parquet").exists());
        assert_eq!(catalog.pending_records().await, 1);
    }

    #[tokio::test]
    async fn test_part_numbering_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let catalog = ParquetCatalog::new(tmp.path(), 100).unwrap();
            catalog.write(&[quote(ADA, 1)], WriteMode::Append).await.unwrap();
            catalog.close().await.unwrap();
        }

        let catalog = ParquetCatalog::new(tmp.path(), 100).unwrap();
        catalog.write(&[quote(ADA, 2)], WriteMode::Append).await.unwrap();
        catalog.close().await.unwrap();

        let dir = quote_dir(&tmp, ADA);
        assert!(dir.join("part-000000.parquet").exists());
        assert!(dir.join("part-000001.parquet").exists());
    }

    #[tokio::test]
    async fn test_upsert_replaces_instrument_file() {
        let tmp = TempDir::new().unwrap();
        let catalog = ParquetCatalog::new(tmp.path(), 100).unwrap();

        catalog.write(&[instrument(4)], WriteMode::Upsert).await.unwrap();
        catalog.write(&[instrument(5)], WriteMode::Upsert).await.unwrap();

        let dir = tmp.path().join("data").join("instrument").join(ADA);
        assert!(!dir.join("instrument.parquet.tmp").exists());

        let batches = read_batches(&dir.join("instrument.parquet"));
        assert_eq!(batches[0].num_rows(), 1);
        let precision = batches[0]
            .column(5)
            .as_any()
            .downcast_ref::<UInt8Array>()
            .unwrap();
        assert_eq!(precision.value(0), 5);
    }

    #[tokio::test]
    async fn test_list_categories_reports_files_and_rows() {
        let tmp = TempDir::new().unwrap();
        let catalog = ParquetCatalog::new(tmp.path(), 100).unwrap();

        catalog.write(&[quote(ADA, 1)], WriteMode::Append).await.unwrap();
        catalog.write(&[quote(ADA, 2)], WriteMode::Append).await.unwrap();
        catalog.write(&[quote("SOLUSDT-PERP.BINANCE", 3)], WriteMode::Append).await.unwrap();
        catalog.write(&[instrument(4)], WriteMode::Upsert).await.unwrap();
        catalog.flush().await.unwrap();

        let inventory = catalog.list_categories().await.unwrap();
        assert_eq!(inventory.len(), 2);

        let quotes = &inventory[0];
        assert_eq!(quotes.category, Category::Quote);
        assert_eq!(
            quotes.partitions,
            vec![ADA.to_string(), "SOLUSDT-PERP.BINANCE".to_string()]
        );
        assert_eq!(quotes.files, 2);
        assert_eq!(quotes.records, 3);
        assert!(quotes.bytes > 0);

        assert_eq!(inventory[1].category, Category::Instrument);
        assert_eq!(inventory[1].records, 1);
    }

    #[tokio::test]
    async fn test_empty_catalog_lists_nothing() {
        let tmp = TempDir::new().unwrap();
        let catalog = ParquetCatalog::new(tmp.path(), 100).unwrap();
        assert!(catalog.list_categories().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_flushes_and_rejects_writes() {
        let tmp = TempDir::new().unwrap();
        let catalog = ParquetCatalog::new(tmp.path(), 100).unwrap();

        catalog.write(&[quote(ADA, 1)], WriteMode::Append).await.unwrap();
        catalog.close().await.unwrap();
        assert!(quote_dir(&tmp, ADA).join("part-000000.parquet").exists());

        let result = catalog.write(&[quote(ADA, 2)], WriteMode::Append).await;
        assert!(matches!(result, Err(CatalogError::Closed)));

        // Second close is a no-op
        catalog.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_reports_rows_it_could_not_persist() {
        let tmp = TempDir::new().unwrap();
        let catalog = ParquetCatalog::new(tmp.path(), 100).unwrap();

        for ts in 0..3 {
            catalog.write(&[quote(ADA, ts)], WriteMode::Append).await.unwrap();
        }
        catalog.write(&[quote("SOLUSDT-PERP.BINANCE", 9)], WriteMode::Append).await.unwrap();

        // A plain file where the partition directory belongs
        let blocked = quote_dir(&tmp, ADA);
        fs::create_dir_all(blocked.parent().unwrap()).unwrap();
        fs::write(&blocked, b"not a directory").unwrap();

        // A failed flush keeps the rows for the next attempt
        assert!(catalog.flush().await.is_err());
        assert_eq!(catalog.pending_records().await, 3);

        let err = catalog.close().await.unwrap_err();
        let CatalogError::Unflushed { lost, .. } = err else {
            panic!("expected Unflushed, got {:?}", err);
        };
        assert_eq!(
            lost,
            vec![LostRecords {
                category: Category::Quote,
                key: ADA.to_string(),
                records: 3,
            }]
        );
        assert_eq!(catalog.pending_records().await, 0);

        // The healthy partition made it to disk
        let inventory = catalog.list_categories().await.unwrap();
        assert_eq!(inventory[0].partitions, vec!["SOLUSDT-PERP.BINANCE".to_string()]);
        assert_eq!(inventory[0].records, 1);
    }

    #[tokio::test]
    async fn test_unstorable_records_refused_at_write() {
        let tmp = TempDir::new().unwrap();
        let catalog = ParquetCatalog::new(tmp.path(), 100).unwrap();

        let MarketEvent::Quote(mut huge) = quote(ADA, 1) else {
            unreachable!()
        };
        huge.bid_price = Decimal::from_i128_with_scale(100_000_000_000_000_000_000, 0);
        let result = catalog.write(&[MarketEvent::Quote(huge)], WriteMode::Append).await;
        assert!(matches!(result, Err(CatalogError::Arrow(_))));

        let empty = MarketEvent::BookDeltas(OrderBookDeltas {
            instrument_id: ADA.parse().unwrap(),
            book_type: BookType::L2Mbp,
            deltas: Vec::new(),
            sequence: 7,
            is_snapshot: false,
            ts_event: 1,
            ts_init: 2,
        });
        let result = catalog.write(&[empty], WriteMode::Append).await;
        assert!(matches!(result, Err(CatalogError::Arrow(_))));

        assert_eq!(catalog.pending_records().await, 0);
        catalog.close().await.unwrap();
        assert!(catalog.list_categories().await.unwrap().is_empty());
    }
}
