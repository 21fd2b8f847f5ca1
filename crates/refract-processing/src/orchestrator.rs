//! Transformation orchestration
//!
//! One request runs validate, cache lookup, stage, face ops, build,
//! execute and commit in order. The working directory is a
//! `tempfile::TempDir`, removed when it goes out of scope on every path.

use crate::cache_key::derive_cache_key;
use crate::command::{BuildTarget, CommandBuilder};
use crate::domain::DomainPolicy;
use crate::error::TransformError;
use crate::face::FaceRegionProcessor;
use crate::fetch::SourceFetcher;
use crate::format::ImageFormat;
use crate::options::OptionSet;
use crate::runner::ProcessRunner;
use bytes::Bytes;
use refract_core::Config;
use refract_storage::{Storage, StorageError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Orchestrator settings, taken from `Config` at startup
#[derive(Debug, Clone)]
pub struct TransformConfig {
    pub convert_path: PathBuf,
    pub mogrify_path: PathBuf,
    pub facedetect_path: PathBuf,
    /// `cjpeg`; used only when the file exists and is executable
    pub mozjpeg_path: Option<PathBuf>,
    pub tmp_dir: PathBuf,
    pub restricted_domains: bool,
    pub whitelist_domains: Vec<String>,
    /// Accept `file://` URLs and plain paths as sources
    pub allow_local_sources: bool,
    pub single_flight: bool,
}

impl TransformConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            convert_path: PathBuf::from(config.convert_path()),
            mogrify_path: PathBuf::from(config.mogrify_path()),
            facedetect_path: PathBuf::from(config.facedetect_path()),
            mozjpeg_path: Some(config.mozjpeg_path())
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            tmp_dir: config.tmp_dir().clone(),
            restricted_domains: config.restricted_domains(),
            whitelist_domains: config.whitelist_domains().to_vec(),
            allow_local_sources: config.allow_local_sources(),
            single_flight: config.single_flight_enabled(),
        }
    }
}

/// A transformation to serve
#[derive(Debug, Clone)]
pub struct TransformRequest {
    /// URL or local path of the source image
    pub source: String,
    pub options: OptionSet,
    pub accepts_webp: bool,
}

/// The served artifact
#[derive(Debug, Clone)]
pub struct TransformedImage {
    pub bytes: Bytes,
    pub content_type: &'static str,
    pub key: String,
    pub cache_hit: bool,
}

/// Per-key async locks. An entry lives while at least one request holds a
/// `KeyLockHandle` for its key.
#[derive(Default)]
struct KeyLocks {
    locks: StdMutex<HashMap<String, KeyLockEntry>>,
}

struct KeyLockEntry {
    lock: Arc<Mutex<()>>,
    holders: usize,
}

impl KeyLocks {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, KeyLockEntry>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire(&self, key: &str) -> KeyLockHandle<'_> {
        let mut entries = self.entries();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| KeyLockEntry {
                lock: Arc::default(),
                holders: 0,
            });
        entry.holders += 1;

        KeyLockHandle {
            owner: self,
            key: key.to_string(),
            lock: entry.lock.clone(),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries().len()
    }
}

/// Registration of one request on a key. Dropping it, including when the
/// request future is cancelled, removes the entry once no holder is left.
struct KeyLockHandle<'a> {
    owner: &'a KeyLocks,
    key: String,
    lock: Arc<Mutex<()>>,
}

impl Drop for KeyLockHandle<'_> {
    fn drop(&mut self) {
        let mut entries = self.owner.entries();
        if let Some(entry) = entries.get_mut(&self.key) {
            entry.holders = entry.holders.saturating_sub(1);
            if entry.holders == 0 {
                entries.remove(&self.key);
            }
        }
    }
}

pub struct TransformationOrchestrator {
    config: TransformConfig,
    storage: Arc<dyn Storage>,
    fetcher: Arc<dyn SourceFetcher>,
    runner: Arc<dyn ProcessRunner>,
    builder: CommandBuilder,
    faces: FaceRegionProcessor,
    policy: DomainPolicy,
    locks: KeyLocks,
}

impl TransformationOrchestrator {
    pub fn new(
        config: TransformConfig,
        storage: Arc<dyn Storage>,
        fetcher: Arc<dyn SourceFetcher>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        let builder = CommandBuilder::new(&config.convert_path);
        let faces = FaceRegionProcessor::new(
            &config.facedetect_path,
            &config.convert_path,
            &config.mogrify_path,
            runner.clone(),
        );
        let policy = DomainPolicy::new(
            config.restricted_domains,
            &config.whitelist_domains,
            config.allow_local_sources,
        );

        Self {
            config,
            storage,
            fetcher,
            runner,
            builder,
            faces,
            policy,
            locks: KeyLocks::default(),
        }
    }

    /// Resolve the artifact key for a request without processing it.
    pub fn cache_key(&self, request: &TransformRequest) -> Result<String, TransformError> {
        self.policy.check(&request.source)?;
        let format = self.output_format(request)?;
        Ok(derive_cache_key(&request.source, &request.options, format))
    }

    fn output_format(&self, request: &TransformRequest) -> Result<ImageFormat, TransformError> {
        ImageFormat::resolve_output(
            request.options.get("output"),
            &request.source,
            request.accepts_webp,
        )
    }

    /// Serve a request from cache or by running the pipeline.
    #[tracing::instrument(skip(self, request), fields(source = %request.source))]
    pub async fn transform(
        &self,
        request: &TransformRequest,
    ) -> Result<TransformedImage, TransformError> {
        self.policy.check(&request.source)?;
        let format = self.output_format(request)?;
        let key = derive_cache_key(&request.source, &request.options, format);

        if !self.config.single_flight {
            return self.serve(request, &key, format).await;
        }

        let handle = self.locks.acquire(&key);
        let _guard = handle.lock.lock().await;
        self.serve(request, &key, format).await
    }

    async fn serve(
        &self,
        request: &TransformRequest,
        key: &str,
        format: ImageFormat,
    ) -> Result<TransformedImage, TransformError> {
        let refresh = request.options.is_truthy("refresh");

        if !refresh {
            match self.storage.read(key).await {
                Ok(bytes) => {
                    tracing::debug!(key = %key, size_bytes = bytes.len(), "Cache hit");
                    return Ok(TransformedImage {
                        bytes,
                        content_type: format.to_mime_type(),
                        key: key.to_string(),
                        cache_hit: true,
                    });
                }
                Err(StorageError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        } else if self.storage.exists(key).await? {
            self.storage.delete(key).await?;
            tracing::debug!(key = %key, "Refresh requested, stale artifact removed");
        }

        let bytes = self.process(request, format).await?;
        self.storage
            .write(key, bytes.clone(), format.to_mime_type())
            .await?;

        Ok(TransformedImage {
            bytes,
            content_type: format.to_mime_type(),
            key: key.to_string(),
            cache_hit: false,
        })
    }

    /// Stage, face ops, build and execute inside a request-scoped directory.
    async fn process(
        &self,
        request: &TransformRequest,
        format: ImageFormat,
    ) -> Result<Bytes, TransformError> {
        let start = std::time::Instant::now();
        let request_id = Uuid::new_v4();
        let workspace = tempfile::Builder::new()
            .prefix(&format!("refract-{}-", request_id))
            .tempdir_in(&self.config.tmp_dir)?;

        let input_format = ImageFormat::from_source(&request.source);
        let source = workspace
            .path()
            .join(format!("source.{}", input_format.extension()));
        let output = workspace.path().join(format!("output.{}", format.extension()));

        let size = self
            .fetcher
            .fetch(&request.source, &source)
            .await
            .map_err(TransformError::SourceFetchFailure)?;

        let options = &request.options;
        if options.is_truthy("face-crop") {
            let position = options.get("face-crop-position").parse().unwrap_or(0);
            self.faces
                .crop_to_face(&source, position)
                .await
                .map_err(TransformError::Process)?;
        }
        if options.is_truthy("face-blur") {
            self.faces
                .blur_faces(&source)
                .await
                .map_err(TransformError::Process)?;
        }

        let mozjpeg = match &self.config.mozjpeg_path {
            Some(path) if is_executable(path).await => Some(path.as_path()),
            _ => None,
        };
        let pipeline = self.builder.build(
            options,
            &BuildTarget {
                source: &source,
                output: &output,
                input_format,
                output_format: format,
                mozjpeg,
            },
        );

        self.runner
            .run(&pipeline)
            .await
            .map_err(TransformError::ProcessingFailure)?;

        let bytes = tokio::fs::read(&output).await?;

        tracing::info!(
            request_id = %request_id,
            source_bytes = size,
            output_bytes = bytes.len(),
            output_format = format.extension(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Image transformed"
        );

        Ok(Bytes::from(bytes))
    }
}

#[cfg(unix)]
async fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata.is_file() && metadata.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
async fn is_executable(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[tokio::test]
    async fn test_is_executable() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("cjpeg");
        std::fs::write(&binary, b"#!/bin/sh\n").unwrap();

        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(!is_executable(&binary).await);

        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert!(is_executable(&binary).await);

        assert!(!is_executable(&dir.path().join("missing")).await);
        assert!(!is_executable(dir.path()).await);
    }

    #[tokio::test]
    async fn test_key_locks_are_shared_and_released() {
        let locks = KeyLocks::default();
        let first = locks.acquire("a.jpg");
        let second = locks.acquire("a.jpg");
        assert!(Arc::ptr_eq(&first.lock, &second.lock));
        assert_eq!(locks.len(), 1);

        drop(second);
        assert_eq!(locks.len(), 1);
        drop(first);
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiters_release_their_entry() {
        let locks = KeyLocks::default();
        let holder = locks.acquire("a.jpg");
        let held = holder.lock.lock().await;

        for _ in 0..10 {
            let waiter = async {
                let handle = locks.acquire("a.jpg");
                let _guard = handle.lock.lock().await;
            };
            let result = tokio::time::timeout(std::time::Duration::from_millis(1), waiter).await;
            assert!(result.is_err());
        }
        assert_eq!(locks.len(), 1);
        assert_eq!(locks.entries()["a.jpg"].holders, 1);

        drop(held);
        drop(holder);
        assert_eq!(locks.len(), 0);
    }

    /// Empty store, fixed source bytes and a conversion that never finishes.
    struct Stalled;

    #[async_trait::async_trait]
    impl Storage for Stalled {
        async fn exists(&self, _key: &str) -> refract_storage::StorageResult<bool> {
            Ok(false)
        }

        async fn read(&self, key: &str) -> refract_storage::StorageResult<Bytes> {
            Err(StorageError::NotFound(key.to_string()))
        }

        async fn write(
            &self,
            _key: &str,
            _data: Bytes,
            _content_type: &str,
        ) -> refract_storage::StorageResult<()> {
            Ok(())
        }

        async fn delete(&self, _key: &str) -> refract_storage::StorageResult<()> {
            Ok(())
        }

        fn backend_type(&self) -> refract_core::StorageBackend {
            refract_core::StorageBackend::Local
        }
    }

    #[async_trait::async_trait]
    impl SourceFetcher for Stalled {
        async fn fetch(
            &self,
            _source: &str,
            destination: &Path,
        ) -> Result<u64, crate::fetch::SourceFetchError> {
            tokio::fs::write(destination, b"source").await?;
            Ok(6)
        }
    }

    #[async_trait::async_trait]
    impl ProcessRunner for Stalled {
        async fn run(
            &self,
            _pipeline: &crate::command::CommandPipeline,
        ) -> Result<Vec<String>, crate::runner::ProcessFailure> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_cancelled_requests_leave_no_key_locks() {
        let tmp = tempfile::tempdir().unwrap();
        let stalled = Arc::new(Stalled);
        let orchestrator = TransformationOrchestrator::new(
            TransformConfig {
                convert_path: PathBuf::from("convert"),
                mogrify_path: PathBuf::from("mogrify"),
                facedetect_path: PathBuf::from("facedetect"),
                mozjpeg_path: None,
                tmp_dir: tmp.path().to_path_buf(),
                restricted_domains: false,
                whitelist_domains: Vec::new(),
                allow_local_sources: false,
                single_flight: true,
            },
            stalled.clone(),
            stalled.clone(),
            stalled,
        );

        for i in 0..20 {
            let request = TransformRequest {
                source: format!("https://cdn.test/{}.jpg", i % 4),
                options: OptionSet::default(),
                accepts_webp: false,
            };
            let result = tokio::time::timeout(
                std::time::Duration::from_millis(5),
                orchestrator.transform(&request),
            )
            .await;
            assert!(result.is_err());
        }

        assert_eq!(orchestrator.locks.len(), 0);
        assert!(std::fs::read_dir(tmp.path()).unwrap().next().is_none());
    }
}
