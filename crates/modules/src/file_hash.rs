//! SHA-256 digest of every file.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use caseflow_core::FileEntry;
use caseflow_ingest::{FileIngestModule, IngestJobContext, IngestModuleFactory, ModuleDataEvent, ModuleOptions};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

pub const MODULE_NAME: &str = "File Hash";
const ARTIFACT_TYPE: &str = "file_hash";
const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct HashOptions {
    chunk_size: usize,
}

impl Default for HashOptions {
    fn default() -> Self {
        Self { chunk_size: DEFAULT_CHUNK_SIZE }
    }
}

/// Digests computed so far, keyed by file path. Shared by every module
/// instance created from one factory.
pub type HashStore = Arc<Mutex<BTreeMap<PathBuf, String>>>;

#[derive(Debug, Default)]
pub struct FileHashFactory {
    store: HashStore,
}

impl FileHashFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> &HashStore {
        &self.store
    }

    pub fn hash_of(&self, path: &std::path::Path) -> Option<String> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner).get(path).cloned()
    }
}

impl IngestModuleFactory for FileHashFactory {
    fn module_display_name(&self) -> &str {
        MODULE_NAME
    }

    fn module_description(&self) -> &str {
        "Computes a SHA-256 digest of each file"
    }

    fn create_file_module(&self, options: &ModuleOptions) -> Option<Box<dyn FileIngestModule>> {
        let options = if options.is_null() {
            HashOptions::default()
        } else {
            serde_json::from_value(options.clone()).unwrap_or_else(|e| {
                warn!(module = MODULE_NAME, error = %e, "Invalid options, using defaults");
                HashOptions::default()
            })
        };
        Some(Box::new(FileHashModule {
            chunk_size: options.chunk_size.max(1),
            store: Arc::clone(&self.store),
            context: None,
        }))
    }
}

pub struct FileHashModule {
    chunk_size: usize,
    store: HashStore,
    context: Option<IngestJobContext>,
}

impl FileHashModule {
    fn cancelled(&self) -> bool {
        self.context.as_ref().is_some_and(|c| c.file_ingest_is_cancelled())
    }
}

impl FileIngestModule for FileHashModule {
    fn start_up(&mut self, context: &IngestJobContext) -> anyhow::Result<()> {
        self.context = Some(context.clone());
        Ok(())
    }

    fn process(&mut self, file: &FileEntry) -> anyhow::Result<()> {
        let mut reader = File::open(&file.path).with_context(|| format!("failed to open {}", file.path.display()))?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            if self.cancelled() {
                debug!(file = %file, "Hashing abandoned, job cancelled");
                return Ok(());
            }
            let n = reader
                .read(&mut buf)
                .with_context(|| format!("failed to read {}", file.path.display()))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        let digest = format!("{:x}", hasher.finalize());
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(file.path.clone(), digest);

        if let Some(context) = &self.context {
            context.fire_data_added(ModuleDataEvent {
                module_name: MODULE_NAME.to_string(),
                artifact_type: ARTIFACT_TYPE.to_string(),
                artifact_count: 1,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn module(chunk_size: usize) -> (FileHashFactory, Box<dyn FileIngestModule>) {
        let factory = FileHashFactory::new();
        let module = factory
            .create_file_module(&serde_json::json!({ "chunk_size": chunk_size }))
            .unwrap();
        (factory, module)
    }

    #[test]
    fn digest_matches_known_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.txt");
        std::fs::write(&path, b"abc").unwrap();

        let (factory, mut module) = module(2);
        module.process(&FileEntry::new(1, 1, &path, 3)).unwrap();

        assert_eq!(
            factory.hash_of(&path).as_deref(),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
    }

    #[test]
    fn chunk_size_does_not_change_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let mut f = File::create(&path).unwrap();
        for i in 0..1000u32 {
            f.write_all(&i.to_le_bytes()).unwrap();
        }
        drop(f);

        let (small, mut a) = module(7);
        let (large, mut b) = module(1 << 20);
        let entry = FileEntry::new(1, 1, &path, 4000);
        a.process(&entry).unwrap();
        b.process(&entry).unwrap();
        assert_eq!(small.hash_of(&path), large.hash_of(&path));
    }

    #[test]
    fn missing_file_is_an_error() {
        let (factory, mut module) = module(16);
        let err = module
            .process(&FileEntry::new(1, 1, "/nonexistent/evidence.img", 0))
            .unwrap_err();
        assert!(err.to_string().contains("failed to open"));
        assert!(factory.store().lock().unwrap().is_empty());
    }

    #[test]
    fn bad_options_fall_back_to_defaults() {
        let factory = FileHashFactory::new();
        assert!(factory
            .create_file_module(&serde_json::json!({ "chunk_size": "big" }))
            .is_some());
        assert!(factory.create_data_source_module(&ModuleOptions::Null).is_none());
    }
}
