use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result as AnyResult};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjPath;
use object_store::{GetOptions, GetRange, ObjectStore};
use platform_registry::PlatformId;
use sha2::{Digest, Sha256};

use crate::error::AppError;
use crate::utils::config::{AppConfig, StorageKind};

pub type DynStore = Arc<dyn ObjectStore>;

/// One regular-file entry pulled out of an archive upload.
#[derive(Debug, Clone)]
pub struct ExtractedEntry {
    pub name: String,
    pub size: u64,
    pub location: String,
}

/// Result of [`StorageManager::extract_archive`]: every regular-file entry,
/// written out under the upload's scope. Main-file selection (largest entry
/// whose extension is a registered platform format) is the caller's job,
/// since it needs platform classification this layer doesn't have.
#[derive(Debug, Clone)]
pub struct ExtractedArchive {
    pub entries: Vec<ExtractedEntry>,
}

/// Storage manager with persistent state and proper lifecycle management.
#[derive(Clone)]
pub struct StorageManager {
    store: DynStore,
    backend_kind: StorageKind,
    local_base: Option<PathBuf>,
}

impl StorageManager {
    /// Create a new StorageManager with the specified configuration.
    ///
    /// This method validates the configuration and creates the appropriate
    /// storage backend with proper initialization.
    pub async fn new(cfg: &AppConfig) -> object_store::Result<Self> {
        let backend_kind = cfg.storage.clone();
        let (store, local_base) = create_storage_backend(cfg).await?;

        Ok(Self {
            store,
            backend_kind,
            local_base,
        })
    }

    /// Create a StorageManager with a custom storage backend.
    ///
    /// This method is useful for testing scenarios where you want to inject
    /// a specific storage backend.
    pub fn with_backend(store: DynStore, backend_kind: StorageKind) -> Self {
        Self {
            store,
            backend_kind,
            local_base: None,
        }
    }

    /// Get the storage backend kind.
    pub fn backend_kind(&self) -> &StorageKind {
        &self.backend_kind
    }

    /// Access the resolved local base directory when using the local backend.
    pub fn local_base_path(&self) -> Option<&Path> {
        self.local_base.as_deref()
    }

    /// Resolve an object location to a filesystem path when using the local backend.
    ///
    /// Returns `None` when the backend is not local or when the provided location includes
    /// unsupported components (absolute paths or parent traversals).
    pub fn resolve_local_path(&self, location: &str) -> Option<PathBuf> {
        let base = self.local_base_path()?;
        let relative = Path::new(location);
        if relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            return None;
        }

        Some(base.join(relative))
    }

    /// Store bytes at the specified location.
    ///
    /// This operation persists data using the underlying storage backend.
    /// For memory backends, data persists for the lifetime of the StorageManager.
    pub async fn put(&self, location: &str, data: Bytes) -> object_store::Result<()> {
        let path = ObjPath::from(location);
        let payload = object_store::PutPayload::from_bytes(data);
        self.store.put(&path, payload).await.map(|_| ())
    }

    /// Retrieve bytes from the specified location.
    ///
    /// Returns the full contents buffered in memory.
    pub async fn get(&self, location: &str) -> object_store::Result<Bytes> {
        let path = ObjPath::from(location);
        let result = self.store.get(&path).await?;
        result.bytes().await
    }

    /// Get a streaming handle for large objects.
    ///
    /// Returns a fallible stream of Bytes chunks suitable for large file processing.
    pub async fn get_stream(
        &self,
        location: &str,
    ) -> object_store::Result<BoxStream<'static, object_store::Result<Bytes>>> {
        let path = ObjPath::from(location);
        let result = self.store.get(&path).await?;
        Ok(result.into_stream())
    }

    /// Read the first `len` bytes of an object without buffering the rest.
    /// Used to sniff a ROM/archive header before the whole body is touched.
    pub async fn peek_prefix(&self, location: &str, len: u64) -> object_store::Result<Bytes> {
        self.read_range(location, 0, len).await
    }

    /// Read `len` bytes starting at `start` without buffering the rest of
    /// the object. Header families whose fields live away from offset 0
    /// (SNES's mirrored header, the PSX ISO's sector at `0x8000`) use this
    /// instead of buffering the whole assembled file.
    pub async fn read_range(&self, location: &str, start: u64, len: u64) -> object_store::Result<Bytes> {
        let path = ObjPath::from(location);
        let opts = GetOptions {
            range: Some(GetRange::Bounded(start..start + len)),
            ..Default::default()
        };
        let result = self.store.get_opts(&path, opts).await?;
        result.bytes().await
    }

    /// Delete all objects below the specified prefix.
    ///
    /// For local filesystem backends, this also attempts to clean up empty directories.
    pub async fn delete_prefix(&self, prefix: &str) -> object_store::Result<()> {
        let prefix_path = ObjPath::from(prefix);
        let locations = self
            .store
            .list(Some(&prefix_path))
            .map_ok(|m| m.location)
            .boxed();
        self.store
            .delete_stream(locations)
            .try_collect::<Vec<_>>()
            .await?;

        // Cleanup filesystem directories only for local backend
        if matches!(self.backend_kind, StorageKind::Local) {
            self.cleanup_filesystem_directories(prefix).await?;
        }

        Ok(())
    }

    /// List all objects below the specified prefix.
    pub async fn list(
        &self,
        prefix: Option<&str>,
    ) -> object_store::Result<Vec<object_store::ObjectMeta>> {
        let prefix_path = prefix.map(ObjPath::from);
        self.store.list(prefix_path.as_ref()).try_collect().await
    }

    /// Check if an object exists at the specified location.
    pub async fn exists(&self, location: &str) -> object_store::Result<bool> {
        let path = ObjPath::from(location);
        self.store
            .head(&path)
            .await
            .map(|_| true)
            .or_else(|e| match e {
                object_store::Error::NotFound { .. } => Ok(false),
                _ => Err(e),
            })
    }

    /// Moves the assembled (or extracted) object at `from` to its permanent
    /// catalog location at `to`, atomic within the store's root. Used for
    /// the final step of assembly; the temp scope it leaves behind is
    /// cleaned up separately once the catalog row is durable.
    pub async fn finalize_object(&self, from: &str, to: &str) -> Result<(), AppError> {
        let from_path = ObjPath::from(from);
        let to_path = ObjPath::from(to);
        self.store
            .rename(&from_path, &to_path)
            .await
            .map_err(AppError::ObjectStore)
    }

    /// Scope under which a single upload's in-flight chunks and assembled
    /// content live until it either completes (and is moved under `roms/`)
    /// or is reaped.
    pub fn new_scope(upload_id: &str) -> String {
        format!("uploads/{upload_id}")
    }

    pub fn chunk_path(scope: &str, index: u32) -> String {
        format!("{scope}/chunks/{index:06}")
    }

    pub fn assembled_path(scope: &str) -> String {
        format!("{scope}/assembled.bin")
    }

    /// Catalog destination for a digest-addressed ROM: `roms/<platform>/<digest>/<name>`.
    pub fn final_path(platform_id: &str, content_digest: &str, sanitized_name: &str) -> String {
        format!("roms/{platform_id}/{content_digest}/{sanitized_name}")
    }

    pub async fn write_chunk(
        &self,
        scope: &str,
        index: u32,
        data: Bytes,
    ) -> object_store::Result<()> {
        self.put(&Self::chunk_path(scope, index), data).await
    }

    /// Concatenates `total_chunks` chunk objects into one assembled object,
    /// streaming each part through a multipart upload so the full payload
    /// is never buffered twice. Returns the assembled size and its SHA-256
    /// digest, computed incrementally as chunks are copied.
    pub async fn assemble(
        &self,
        scope: &str,
        total_chunks: u32,
    ) -> Result<(u64, String), AppError> {
        let assembled_path = ObjPath::from(Self::assembled_path(scope));
        let mut upload = self
            .store
            .put_multipart(&assembled_path)
            .await
            .map_err(AppError::ObjectStore)?;

        let mut hasher = Sha256::new();
        let mut total_size: u64 = 0;

        for index in 0..total_chunks {
            let bytes = self
                .get(&Self::chunk_path(scope, index))
                .await
                .map_err(AppError::ObjectStore)?;
            hasher.update(&bytes);
            total_size += bytes.len() as u64;
            upload
                .put_part(bytes.into())
                .await
                .map_err(AppError::ObjectStore)?;
        }

        upload.complete().await.map_err(AppError::ObjectStore)?;

        Ok((total_size, format!("{:x}", hasher.finalize())))
    }

    /// Recomputes the SHA-256 digest of a stored object by streaming it,
    /// used to re-verify content after it has been moved or extracted.
    pub async fn stream_digest(&self, location: &str) -> Result<String, AppError> {
        let mut stream = self.get_stream(location).await.map_err(AppError::ObjectStore)?;
        let mut hasher = Sha256::new();

        while let Some(chunk) = stream.next().await {
            hasher.update(&chunk.map_err(AppError::ObjectStore)?);
        }

        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Extracts every regular-file entry from a ZIP archive at
    /// `archive_location`, rejecting it as an archive bomb when the
    /// uncompressed/compressed ratio exceeds `max_ratio`. Entry names are
    /// sanitized against zip-slip before being placed under `scope`.
    pub async fn extract_archive(
        &self,
        scope: &str,
        archive_location: &str,
        max_ratio: u64,
    ) -> Result<ExtractedArchive, AppError> {
        let archive_bytes = self.get(archive_location).await.map_err(AppError::ObjectStore)?;
        let compressed_size = archive_bytes.len() as u64;
        let cursor = std::io::Cursor::new(archive_bytes.to_vec());
        let mut archive = zip::ZipArchive::new(cursor)
            .map_err(|err| AppError::UnsupportedFormat(err.to_string()))?;

        let mut total_uncompressed: u64 = 0;
        for i in 0..archive.len() {
            let entry = archive
                .by_index(i)
                .map_err(|err| AppError::UnsupportedFormat(err.to_string()))?;
            total_uncompressed += entry.size();
        }

        if compressed_size > 0 && total_uncompressed / compressed_size.max(1) > max_ratio {
            return Err(AppError::ArchiveBomb(format!(
                "uncompressed/compressed ratio {} exceeds limit {max_ratio}",
                total_uncompressed / compressed_size.max(1)
            )));
        }

        let mut entries = Vec::new();
        for i in 0..archive.len() {
            let (name, size, buf) = {
                let mut entry = archive
                    .by_index(i)
                    .map_err(|err| AppError::UnsupportedFormat(err.to_string()))?;
                if !entry.is_file() {
                    continue;
                }
                let name = sanitize_archive_entry_name(entry.name());
                let size = entry.size();
                let mut buf = Vec::new();
                std::io::Read::read_to_end(&mut entry, &mut buf).map_err(AppError::Io)?;
                (name, size, buf)
            };

            let location = format!("{scope}/extracted/{name}");
            self.put(&location, Bytes::from(buf))
                .await
                .map_err(AppError::ObjectStore)?;
            entries.push(ExtractedEntry { name, size, location });
        }

        if entries.is_empty() {
            return Err(AppError::NoRecognizedContent("archive contained no files".into()));
        }

        Ok(ExtractedArchive { entries })
    }

    /// A cheap pre-check on an assembled file's opening 512 bytes: failure
    /// here is non-fatal and only ever recorded as a warning, unlike the
    /// hard per-family header parse that follows it. Families with a fixed
    /// magic compare against it directly; Game Boy/GBA have none, so they
    /// fall back to rejecting the empty-file and single-repeated-byte cases
    /// (a common symptom of a truncated or zeroed-out transfer).
    pub async fn probe_signature(&self, location: &str, platform_id: PlatformId) -> Result<bool, AppError> {
        let prefix = self.peek_prefix(location, 512).await.map_err(AppError::ObjectStore)?;
        Ok(signature_matches(platform_id, &prefix))
    }

    /// Cleanup filesystem directories for local backend.
    ///
    /// This is a best-effort cleanup and ignores errors.
    async fn cleanup_filesystem_directories(&self, prefix: &str) -> object_store::Result<()> {
        if !matches!(self.backend_kind, StorageKind::Local) {
            return Ok(());
        }

        let Some(base) = &self.local_base else {
            return Ok(());
        };

        let relative = Path::new(prefix);
        if relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            tracing::warn!(
                prefix = %prefix,
                "Skipping directory cleanup for unsupported prefix components"
            );
            return Ok(());
        }

        let mut current = base.join(relative);

        while current.starts_with(base) && current.as_path() != base.as_path() {
            match tokio::fs::remove_dir(&current).await {
                Ok(_) => {}
                Err(err) => match err.kind() {
                    ErrorKind::NotFound => {}
                    ErrorKind::DirectoryNotEmpty => break,
                    _ => tracing::debug!(
                        error = %err,
                        path = %current.display(),
                        "Failed to remove directory during cleanup"
                    ),
                },
            }

            if let Some(parent) = current.parent() {
                current = parent.to_path_buf();
            } else {
                break;
            }
        }

        Ok(())
    }
}

const SNES_HEADER_OFFSETS: [usize; 3] = [0x7FC0, 0xFFC0, 0x40C0];

fn signature_matches(platform_id: PlatformId, bytes: &[u8]) -> bool {
    match platform_id {
        PlatformId::Nes => bytes.len() >= 4 && &bytes[0..4] == b"NES\x1A",
        PlatformId::Snes => SNES_HEADER_OFFSETS.iter().any(|&offset| {
            bytes.len() >= offset + 32 && {
                let checksum = u16::from_le_bytes([bytes[offset + 28], bytes[offset + 29]]);
                let complement = u16::from_le_bytes([bytes[offset + 30], bytes[offset + 31]]);
                checksum ^ complement == 0xFFFF
            }
        }),
        PlatformId::N64 => {
            bytes.len() >= 4 && u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) == 0x8037_1240
        }
        PlatformId::Genesis => {
            bytes.len() >= 0x110 && bytes[0x100..0x110].windows(4).any(|window| window == b"SEGA")
        }
        PlatformId::Psx => bytes.len() >= 6 && &bytes[1..6] == b"CD001",
        PlatformId::Gb | PlatformId::Gba => {
            !bytes.is_empty() && !bytes.iter().all(|byte| *byte == bytes[0])
        }
    }
}

/// Collapses a zip entry name to a single path-safe segment, defeating
/// zip-slip by dropping any `..`/absolute/prefix components outright
/// rather than trying to resolve them.
fn sanitize_archive_entry_name(name: &str) -> String {
    let collapsed: String = Path::new(name)
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("_");

    if collapsed.is_empty() {
        "entry".to_string()
    } else {
        collapsed
    }
}

/// Create a storage backend based on configuration.
///
/// This factory function handles the creation and initialization of different
/// storage backends with proper error handling and validation.
async fn create_storage_backend(
    cfg: &AppConfig,
) -> object_store::Result<(DynStore, Option<PathBuf>)> {
    match cfg.storage {
        StorageKind::Local => {
            let base = resolve_base_dir(cfg);
            if !base.exists() {
                tokio::fs::create_dir_all(&base).await.map_err(|e| {
                    object_store::Error::Generic {
                        store: "LocalFileSystem",
                        source: e.into(),
                    }
                })?;
            }
            let store = LocalFileSystem::new_with_prefix(base.clone())?;
            Ok((Arc::new(store), Some(base)))
        }
        StorageKind::Memory => {
            let store = InMemory::new();
            Ok((Arc::new(store), None))
        }
    }
}

/// Testing utilities for storage operations.
///
/// This module provides specialized utilities for testing scenarios with
/// automatic memory backend setup and proper test isolation.
#[cfg(test)]
pub mod testing {
    use super::*;
    use uuid;

    /// Create a test configuration with memory storage.
    ///
    /// This provides a ready-to-use configuration for testing scenarios
    /// that don't require filesystem persistence.
    pub fn test_config_memory() -> AppConfig {
        AppConfig {
            storage: StorageKind::Memory,
            data_dir: "/tmp/unused".into(),
            ..Default::default()
        }
    }

    /// Create a test configuration with local storage.
    ///
    /// This provides a ready-to-use configuration for testing scenarios
    /// that require actual filesystem operations.
    pub fn test_config_local() -> AppConfig {
        let base = format!("/tmp/catalog_test_storage_{}", uuid::Uuid::new_v4());
        AppConfig {
            storage: StorageKind::Local,
            data_dir: base,
            ..Default::default()
        }
    }

    /// A specialized StorageManager for testing scenarios.
    ///
    /// This provides automatic setup for memory storage with proper isolation
    /// and cleanup capabilities for test environments.
    #[derive(Clone)]
    pub struct TestStorageManager {
        storage: StorageManager,
        _temp_dir: Option<(String, std::path::PathBuf)>, // For local storage cleanup
    }

    impl TestStorageManager {
        /// Create a new TestStorageManager with memory backend.
        ///
        /// This is the preferred method for unit tests as it provides
        /// fast execution and complete isolation.
        pub async fn new_memory() -> object_store::Result<Self> {
            let cfg = test_config_memory();
            let storage = StorageManager::new(&cfg).await?;

            Ok(Self {
                storage,
                _temp_dir: None,
            })
        }

        /// Create a new TestStorageManager with local filesystem backend.
        ///
        /// This method creates a temporary directory that will be automatically
        /// cleaned up when the TestStorageManager is dropped.
        pub async fn new_local() -> object_store::Result<Self> {
            let cfg = test_config_local();
            let storage = StorageManager::new(&cfg).await?;
            let resolved = storage
                .local_base_path()
                .map(|path| (cfg.data_dir.clone(), path.to_path_buf()));

            Ok(Self {
                storage,
                _temp_dir: resolved,
            })
        }

        /// Create a TestStorageManager with custom configuration.
        pub async fn with_config(cfg: &AppConfig) -> object_store::Result<Self> {
            let storage = StorageManager::new(cfg).await?;
            let temp_dir = if matches!(cfg.storage, StorageKind::Local) {
                storage
                    .local_base_path()
                    .map(|path| (cfg.data_dir.clone(), path.to_path_buf()))
            } else {
                None
            };

            Ok(Self {
                storage,
                _temp_dir: temp_dir,
            })
        }

        /// Get a reference to the underlying StorageManager.
        pub fn storage(&self) -> &StorageManager {
            &self.storage
        }

        /// Clone the underlying StorageManager.
        pub fn clone_storage(&self) -> StorageManager {
            self.storage.clone()
        }

        /// Store test data at the specified location.
        pub async fn put(&self, location: &str, data: &[u8]) -> object_store::Result<()> {
            self.storage.put(location, Bytes::from(data.to_vec())).await
        }

        /// Retrieve test data from the specified location.
        pub async fn get(&self, location: &str) -> object_store::Result<Bytes> {
            self.storage.get(location).await
        }

        /// Delete test data below the specified prefix.
        pub async fn delete_prefix(&self, prefix: &str) -> object_store::Result<()> {
            self.storage.delete_prefix(prefix).await
        }

        /// Check if test data exists at the specified location.
        pub async fn exists(&self, location: &str) -> object_store::Result<bool> {
            self.storage.exists(location).await
        }

        /// List all test objects below the specified prefix.
        pub async fn list(
            &self,
            prefix: Option<&str>,
        ) -> object_store::Result<Vec<object_store::ObjectMeta>> {
            self.storage.list(prefix).await
        }
    }

    impl Drop for TestStorageManager {
        fn drop(&mut self) {
            // Clean up temporary directories for local storage
            if let Some((_, path)) = &self._temp_dir {
                if path.exists() {
                    let _ = std::fs::remove_dir_all(path);
                }
            }
        }
    }

    /// Convenience macro for creating memory storage tests.
    ///
    /// This macro simplifies the creation of test storage with memory backend.
    #[macro_export]
    macro_rules! test_storage_memory {
        () => {{
            async move {
                $crate::storage::store::testing::TestStorageManager::new_memory()
                    .await
                    .expect("Failed to create test memory storage")
            }
        }};
    }

    /// Convenience macro for creating local storage tests.
    ///
    /// This macro simplifies the creation of test storage with local filesystem backend.
    #[macro_export]
    macro_rules! test_storage_local {
        () => {{
            async move {
                $crate::storage::store::testing::TestStorageManager::new_local()
                    .await
                    .expect("Failed to create test local storage")
            }
        }};
    }
}

/// Resolve the absolute base directory used for local storage from config.
///
/// If `data_dir` is relative, it is resolved against the current working directory.
pub fn resolve_base_dir(cfg: &AppConfig) -> PathBuf {
    if cfg.data_dir.starts_with('/') {
        PathBuf::from(&cfg.data_dir)
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(&cfg.data_dir)
    }
}

/// Split an absolute filesystem path into `(parent_dir, file_name)`.
pub fn split_abs_path(path: &str) -> AnyResult<(PathBuf, String)> {
    let pb = PathBuf::from(path);
    let parent = pb
        .parent()
        .ok_or_else(|| anyhow!("Path has no parent: {path}"))?
        .to_path_buf();
    let file = pb
        .file_name()
        .ok_or_else(|| anyhow!("Path has no file name: {path}"))?
        .to_string_lossy()
        .to_string();
    Ok((parent, file))
}

/// Split a logical object location `"a/b/c"` into `("a/b", "c")`.
pub fn split_object_path(path: &str) -> AnyResult<(String, String)> {
    if let Some((p, f)) = path.rsplit_once('/') {
        return Ok((p.to_string(), f.to_string()));
    }
    Err(anyhow!("Object path has no separator: {path}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::io::Write;
    use uuid::Uuid;

    fn test_config(root: &str) -> AppConfig {
        AppConfig {
            storage: StorageKind::Local,
            data_dir: root.into(),
            ..Default::default()
        }
    }

    fn test_config_memory() -> AppConfig {
        AppConfig {
            storage: StorageKind::Memory,
            data_dir: "/tmp/unused".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_storage_manager_memory_basic_operations() {
        let cfg = test_config_memory();
        let storage = StorageManager::new(&cfg)
            .await
            .expect("create storage manager");
        assert!(storage.local_base_path().is_none());

        let location = "test/data/file.txt";
        let data = b"test data for storage manager";

        storage
            .put(location, Bytes::from(data.to_vec()))
            .await
            .expect("put");
        let retrieved = storage.get(location).await.expect("get");
        assert_eq!(retrieved.as_ref(), data);

        assert!(storage.exists(location).await.expect("exists check"));

        storage.delete_prefix("test/data/").await.expect("delete");
        assert!(!storage
            .exists(location)
            .await
            .expect("exists check after delete"));
    }

    #[tokio::test]
    async fn test_storage_manager_local_basic_operations() {
        let base = format!("/tmp/catalog_storage_test_{}", Uuid::new_v4());
        let cfg = test_config(&base);
        let storage = StorageManager::new(&cfg)
            .await
            .expect("create storage manager");
        let resolved_base = storage
            .local_base_path()
            .expect("resolved base dir")
            .to_path_buf();
        assert_eq!(resolved_base, PathBuf::from(&base));

        let location = "test/data/file.txt";
        let data = b"test data for local storage";

        storage
            .put(location, Bytes::from(data.to_vec()))
            .await
            .expect("put");
        let retrieved = storage.get(location).await.expect("get");
        assert_eq!(retrieved.as_ref(), data);

        let object_dir = resolved_base.join("test/data");
        tokio::fs::metadata(&object_dir)
            .await
            .expect("object directory exists after write");

        assert!(storage.exists(location).await.expect("exists check"));

        storage.delete_prefix("test/data/").await.expect("delete");
        assert!(!storage
            .exists(location)
            .await
            .expect("exists check after delete"));
        assert!(
            tokio::fs::metadata(&object_dir).await.is_err(),
            "object directory should be removed"
        );
        tokio::fs::metadata(&resolved_base)
            .await
            .expect("base directory remains intact");

        let _ = tokio::fs::remove_dir_all(&base).await;
    }

    #[tokio::test]
    async fn test_storage_manager_with_custom_backend() {
        let custom_store = InMemory::new();
        let storage = StorageManager::with_backend(Arc::new(custom_store), StorageKind::Memory);

        let location = "custom/test.txt";
        let data = b"custom backend test";

        storage
            .put(location, Bytes::from(data.to_vec()))
            .await
            .expect("put");
        let retrieved = storage.get(location).await.expect("get");
        assert_eq!(retrieved.as_ref(), data);

        assert!(storage.exists(location).await.expect("exists"));
        assert_eq!(*storage.backend_kind(), StorageKind::Memory);
    }

    #[tokio::test]
    async fn assemble_concatenates_chunks_in_order_and_digests_them() {
        let cfg = test_config_memory();
        let storage = StorageManager::new(&cfg).await.expect("create storage manager");

        let scope = StorageManager::new_scope("upload-1");
        storage
            .write_chunk(&scope, 0, Bytes::from_static(b"hello "))
            .await
            .expect("write chunk 0");
        storage
            .write_chunk(&scope, 1, Bytes::from_static(b"world"))
            .await
            .expect("write chunk 1");

        let (size, digest) = storage.assemble(&scope, 2).await.expect("assemble");
        assert_eq!(size, 11);

        let mut hasher = Sha256::new();
        hasher.update(b"hello world");
        assert_eq!(digest, format!("{:x}", hasher.finalize()));

        let assembled = storage
            .get(&StorageManager::assembled_path(&scope))
            .await
            .expect("get assembled");
        assert_eq!(assembled.as_ref(), b"hello world");
    }

    #[tokio::test]
    async fn stream_digest_matches_assemble_digest() {
        let cfg = test_config_memory();
        let storage = StorageManager::new(&cfg).await.expect("create storage manager");
        let scope = StorageManager::new_scope("upload-2");
        storage
            .write_chunk(&scope, 0, Bytes::from_static(b"payload"))
            .await
            .expect("write chunk");

        let (_, assemble_digest) = storage.assemble(&scope, 1).await.expect("assemble");
        let digest = storage
            .stream_digest(&StorageManager::assembled_path(&scope))
            .await
            .expect("stream digest");

        assert_eq!(digest, assemble_digest);
    }

    #[tokio::test]
    async fn read_range_returns_the_requested_window() {
        let cfg = test_config_memory();
        let storage = StorageManager::new(&cfg).await.expect("create storage manager");
        storage
            .put("range/file.bin", Bytes::from_static(b"0123456789"))
            .await
            .expect("put");

        let window = storage.read_range("range/file.bin", 3, 4).await.expect("read_range");
        assert_eq!(window.as_ref(), b"3456");

        let prefix = storage.peek_prefix("range/file.bin", 3).await.expect("peek_prefix");
        assert_eq!(prefix.as_ref(), b"012");
    }

    #[tokio::test]
    async fn extract_archive_rejects_bomb_ratio_and_sanitizes_entry_names() {
        let cfg = test_config_memory();
        let storage = StorageManager::new(&cfg).await.expect("create storage manager");

        let mut buf = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            writer
                .start_file("../../etc/passwd", options)
                .expect("start entry");
            writer.write_all(b"rom bytes").expect("write entry");
            writer.finish().expect("finish archive");
        }

        let scope = StorageManager::new_scope("upload-3");
        storage
            .put(&format!("{scope}/archive.zip"), Bytes::from(buf))
            .await
            .expect("put archive");

        let extracted = storage
            .extract_archive(&scope, &format!("{scope}/archive.zip"), 1000)
            .await
            .expect("extract archive");

        assert_eq!(extracted.entries.len(), 1);
        let entry = &extracted.entries[0];
        assert_eq!(entry.size, 9);
        assert!(!entry.location.contains(".."));
        let bytes = storage.get(&entry.location).await.expect("get extracted");
        assert_eq!(bytes.as_ref(), b"rom bytes");
    }

    #[tokio::test]
    async fn finalize_object_moves_content_to_the_catalog_path() {
        let cfg = test_config_memory();
        let storage = StorageManager::new(&cfg).await.expect("create storage manager");
        storage
            .put("uploads/u1/assembled.bin", Bytes::from_static(b"rom data"))
            .await
            .expect("put assembled");

        storage
            .finalize_object("uploads/u1/assembled.bin", "roms/nes/abc123/game.nes")
            .await
            .expect("finalize");

        assert!(!storage.exists("uploads/u1/assembled.bin").await.expect("exists"));
        let moved = storage.get("roms/nes/abc123/game.nes").await.expect("get moved");
        assert_eq!(moved.as_ref(), b"rom data");
    }

    #[tokio::test]
    async fn probe_signature_checks_platform_specific_magic() {
        let cfg = test_config_memory();
        let storage = StorageManager::new(&cfg).await.expect("create storage manager");

        storage
            .put("probe/nes.bin", Bytes::from_static(b"NES\x1Asome real content"))
            .await
            .expect("put nes");
        assert!(storage
            .probe_signature("probe/nes.bin", PlatformId::Nes)
            .await
            .expect("probe"));

        storage
            .put("probe/not_nes.bin", Bytes::from(vec![0u8; 32]))
            .await
            .expect("put not nes");
        assert!(!storage
            .probe_signature("probe/not_nes.bin", PlatformId::Nes)
            .await
            .expect("probe"));
    }

    #[tokio::test]
    async fn probe_signature_rejects_uniform_byte_runs_for_families_without_magic() {
        let cfg = test_config_memory();
        let storage = StorageManager::new(&cfg).await.expect("create storage manager");

        storage
            .put("probe/zeroed.bin", Bytes::from(vec![0u8; 32]))
            .await
            .expect("put zeroed");
        assert!(!storage
            .probe_signature("probe/zeroed.bin", PlatformId::Gb)
            .await
            .expect("probe"));

        storage
            .put("probe/real.bin", Bytes::from_static(b"some real content"))
            .await
            .expect("put real");
        assert!(storage
            .probe_signature("probe/real.bin", PlatformId::Gb)
            .await
            .expect("probe"));
    }
}
