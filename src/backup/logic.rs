// mysqlbackup/src/backup/logic.rs
use chrono::{Local, NaiveDate};
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::backup::archive;
use crate::backup::cleanup::TempArtifact;
use crate::backup::db_dump::Dumper;
use crate::backup::s3_upload::ObjectStore;
use crate::config::Config;
use crate::errors::{AppError, Result, Stage};

pub const BACKUP_FILE_NAME_DATE_FORMAT: &str = "%d%m%y";

/// `{database}_{DDMMYY}.sql`
pub fn dump_file_name(database: &str, date: NaiveDate) -> String {
    format!("{}_{}.sql", database, date.format(BACKUP_FILE_NAME_DATE_FORMAT))
}

/// `{database}/{compressed file name}`
pub fn object_key(database: &str, compressed: &Path) -> String {
    let file_name = compressed
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}/{}", database, file_name)
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Dump -> compress -> upload for one database, owning every local file it creates.
pub struct BackupPipeline<D, S> {
    config: Config,
    dumper: D,
    store: S,
    clock: fn() -> NaiveDate,
}

impl<D: Dumper, S: ObjectStore> BackupPipeline<D, S> {
    pub fn new(config: Config, dumper: D, store: S) -> Self {
        BackupPipeline {
            config,
            dumper,
            store,
            clock: today,
        }
    }

    /// Replaces the date source used for file names.
    pub fn with_clock(mut self, clock: fn() -> NaiveDate) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    /// Runs one backup and returns the uploaded object key.
    ///
    /// Failures are logged here with database and stage; no local file created
    /// by the run survives it, whatever the outcome.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<String> {
        let database = self.config.db.name.as_str();
        let date = (self.clock)();
        tracing::info!(database, "Starting backup");

        match self.run_stages(date, cancel).await {
            Ok(key) => {
                tracing::info!(database, key = %key, bucket = %self.config.s3.bucket, "Backup completed");
                Ok(key)
            }
            Err(e) => {
                let stage = e.stage().map(|s| s.to_string()).unwrap_or_default();
                tracing::error!(database, stage = %stage, error = %e, "Backup failed");
                Err(e)
            }
        }
    }

    async fn run_stages(&self, date: NaiveDate, cancel: &CancellationToken) -> Result<String> {
        let db = &self.config.db;
        let database = db.name.as_str();

        let raw_dump = TempArtifact::new(self.config.backup.dir.join(dump_file_name(database, date)));
        tracing::debug!(database, path = %raw_dump.path().display(), "Dumping database");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::cancelled(database, Stage::Dump)),
            result = self.dumper.produce_dump(db, raw_dump.path()) => result?,
        }

        let source = raw_dump.path().to_path_buf();
        let level = self.config.backup.compression_level;
        let token = cancel.clone();
        let compressed = tokio::task::spawn_blocking(move || {
            archive::compress_file(&source, level, &token)
        })
        .await
        .map_err(|e| AppError::backup(database, Stage::Compress, format!("Compression task failed: {}", e)))?
        .map_err(|e| e.retarget(database))?;
        let compressed = TempArtifact::new(compressed);
        drop(raw_dump);

        let key = object_key(database, compressed.path());
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::cancelled(database, Stage::Upload)),
            result = self.store.put(compressed.path(), &key) => result?,
        }
        Ok(key)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{BackupConfig, CompressionLevel, DbConfig, PasswordChannel, S3Config};
    use async_trait::async_trait;
    use flate2::read::GzDecoder;
    use std::fs;
    use std::io::Read;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::Notify;

    pub(crate) fn test_config(dir: &Path, database: &str) -> Config {
        Config {
            db: DbConfig {
                host: "db.internal".to_string(),
                port: 3306,
                user: "backup".to_string(),
                password: "hunter2".to_string(),
                name: database.to_string(),
                password_channel: PasswordChannel::Stdin,
                dump_command: "mysqldump".to_string(),
            },
            backup: BackupConfig {
                dir: dir.to_path_buf(),
                compression_level: CompressionLevel::default(),
                schedule: None,
            },
            s3: S3Config {
                endpoint: "https://s3.example.com".to_string(),
                region: "eu-central-1".to_string(),
                access_key: "AKIAEXAMPLE".to_string(),
                secret_key: "s3cr3t".to_string(),
                bucket: "backups".to_string(),
                force_path_style: false,
            },
        }
    }

    pub(crate) fn new_year() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date")
    }

    /// Writes a fixed dump, failing on the call numbers listed in `fail_on` (1-based).
    pub(crate) struct FakeDumper {
        pub calls: AtomicUsize,
        pub fail_on: Vec<usize>,
    }

    impl FakeDumper {
        pub(crate) fn new(fail_on: Vec<usize>) -> Self {
            FakeDumper {
                calls: AtomicUsize::new(0),
                fail_on,
            }
        }
    }

    pub(crate) const DUMP_CONTENT: &[u8] = b"CREATE TABLE orders (id INT);\nINSERT INTO orders VALUES (1);\n";

    #[async_trait]
    impl Dumper for FakeDumper {
        async fn produce_dump(&self, db: &DbConfig, destination: &Path) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            // Partial output, like a tool that dies half way.
            fs::write(destination, &DUMP_CONTENT[..10])?;
            if self.fail_on.contains(&call) {
                return Err(AppError::backup(
                    &db.name,
                    Stage::Dump,
                    "mysqldump: Got error: 2003: Can't connect to MySQL server",
                ));
            }
            fs::write(destination, DUMP_CONTENT)?;
            Ok(())
        }
    }

    /// Records uploads (key plus decompressed content) and can be told to fail.
    #[derive(Default)]
    pub(crate) struct MemoryStore {
        pub uploads: Mutex<Vec<(String, Vec<u8>)>>,
        pub fail: bool,
    }

    impl MemoryStore {
        pub(crate) fn keys(&self) -> Vec<String> {
            self.uploads
                .lock()
                .map(|u| u.iter().map(|(k, _)| k.clone()).collect())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn put(&self, path: &Path, key: &str) -> Result<()> {
            assert!(path.exists(), "artifact must exist while uploading");
            if self.fail {
                return Err(AppError::upload("backups", key, "connection reset by peer"));
            }
            let mut content = Vec::new();
            GzDecoder::new(fs::File::open(path)?).read_to_end(&mut content)?;
            if let Ok(mut uploads) = self.uploads.lock() {
                uploads.push((key.to_string(), content));
            }
            Ok(())
        }
    }

    /// Notifies `started` once it holds the artifact, then never finishes.
    #[derive(Default)]
    pub(crate) struct HangingStore {
        pub started: Arc<Notify>,
        pub saw_artifact: AtomicBool,
    }

    #[async_trait]
    impl ObjectStore for HangingStore {
        async fn put(&self, path: &Path, _key: &str) -> Result<()> {
            self.saw_artifact.store(path.exists(), Ordering::SeqCst);
            self.started.notify_one();
            std::future::pending::<Result<()>>().await
        }
    }

    fn dir_entries(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
        Ok(fs::read_dir(dir)?
            .map(|e| e.map(|e| e.path()))
            .collect::<std::io::Result<_>>()?)
    }

    #[test]
    fn test_naming_scenario() {
        let raw = dump_file_name("orders", new_year());
        assert_eq!(raw, "orders_010124.sql");

        let compressed = archive::compressed_path_for(Path::new(&raw));
        assert_eq!(compressed, PathBuf::from("orders_010124.sql.gz"));
        assert_eq!(object_key("orders", &compressed), "orders/orders_010124.sql.gz");
    }

    #[tokio::test]
    async fn test_successful_run_uploads_and_cleans_up() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let pipeline = BackupPipeline::new(
            test_config(dir.path(), "orders"),
            FakeDumper::new(vec![]),
            MemoryStore::default(),
        )
        .with_clock(new_year);

        let key = pipeline.run(&CancellationToken::new()).await?;

        assert_eq!(key, "orders/orders_010124.sql.gz");
        let uploads = pipeline.store.uploads.lock().map(|u| u.clone()).unwrap_or_default();
        assert_eq!(uploads, vec![(key, DUMP_CONTENT.to_vec())]);
        assert!(dir_entries(dir.path())?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_dump_skips_compression_and_upload() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let pipeline = BackupPipeline::new(
            test_config(dir.path(), "orders"),
            FakeDumper::new(vec![1]),
            MemoryStore::default(),
        )
        .with_clock(new_year);

        let err = pipeline.run(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, AppError::Backup { stage: Stage::Dump, .. }));
        assert!(err.to_string().contains("Can't connect to MySQL server"));
        assert!(pipeline.store.keys().is_empty());
        assert!(dir_entries(dir.path())?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_upload_still_removes_compressed_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = MemoryStore {
            fail: true,
            ..MemoryStore::default()
        };
        let pipeline = BackupPipeline::new(test_config(dir.path(), "orders"), FakeDumper::new(vec![]), store)
            .with_clock(new_year);

        let err = pipeline.run(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, AppError::Upload { .. }));
        assert!(dir_entries(dir.path())?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_compression_failure_removes_raw_dump() -> anyhow::Result<()> {
        // A directory squatting on the compressed file name makes File::create fail.
        let dir = tempfile::tempdir()?;
        let squatter = dir.path().join("orders_010124.sql.gz");
        fs::create_dir(&squatter)?;
        let pipeline = BackupPipeline::new(
            test_config(dir.path(), "orders"),
            FakeDumper::new(vec![]),
            MemoryStore::default(),
        )
        .with_clock(new_year);

        let err = pipeline.run(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, AppError::Backup { stage: Stage::Compress, ref target, .. } if target == "orders"));
        assert!(pipeline.store.keys().is_empty());
        assert_eq!(dir_entries(dir.path())?, vec![squatter]);
        Ok(())
    }

    #[tokio::test]
    async fn test_same_day_runs_overwrite_same_key() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let pipeline = BackupPipeline::new(
            test_config(dir.path(), "orders"),
            FakeDumper::new(vec![]),
            MemoryStore::default(),
        )
        .with_clock(new_year);
        let cancel = CancellationToken::new();

        pipeline.run(&cancel).await?;
        assert!(dir_entries(dir.path())?.is_empty());
        pipeline.run(&cancel).await?;
        assert!(dir_entries(dir.path())?.is_empty());

        assert_eq!(
            pipeline.store.keys(),
            vec!["orders/orders_010124.sql.gz", "orders/orders_010124.sql.gz"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_cancelled_run_leaves_nothing_behind() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let pipeline = BackupPipeline::new(
            test_config(dir.path(), "orders"),
            FakeDumper::new(vec![]),
            MemoryStore::default(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = pipeline.run(&cancel).await.unwrap_err();

        assert!(matches!(err, AppError::Cancelled { stage: Stage::Dump, .. }));
        assert!(pipeline.store.keys().is_empty());
        assert!(dir_entries(dir.path())?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_during_upload_removes_compressed_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = HangingStore::default();
        let started = Arc::clone(&store.started);
        let pipeline = BackupPipeline::new(test_config(dir.path(), "orders"), FakeDumper::new(vec![]), store)
            .with_clock(new_year);
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                started.notified().await;
                cancel.cancel();
            })
        };
        let err = pipeline.run(&cancel).await.unwrap_err();
        canceller.await?;

        assert!(matches!(err, AppError::Cancelled { stage: Stage::Upload, ref target } if target == "orders"));
        assert!(pipeline.store.saw_artifact.load(Ordering::SeqCst));
        assert!(dir_entries(dir.path())?.is_empty());
        Ok(())
    }
}
