//! Test harness for isolated orchestrator runs.
//!
//! Every harness owns a temporary data directory backing a `FileStore`, so
//! two orchestrators built from the same harness behave like a process
//! before and after a restart.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use markwatch::{
    ClientConfig, DetectionPayload, FileStore, Identity, KeyValueStore, Orchestrator,
    StaticPlanPolicy,
};

use super::service::ScriptedService;

pub const MIB: usize = 1024 * 1024;

pub struct TestHarness {
    temp_dir: TempDir,
    pub service: Arc<ScriptedService>,
    pub store: Arc<FileStore>,
    pub config: ClientConfig,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = ClientConfig {
            data_dir: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        };
        Self {
            store: Arc::new(FileStore::new(temp_dir.path())),
            temp_dir,
            service: Arc::new(ScriptedService::new()),
            config,
        }
    }

    pub fn data_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn identity() -> Identity {
        Identity::User("user-42".to_string())
    }

    /// Builds an orchestrator over the shared store and service.
    pub fn orchestrator(&self, tier: &str) -> Orchestrator {
        let policy = StaticPlanPolicy::from_config(&self.config);
        let store: Arc<dyn KeyValueStore> = self.store.clone();
        Orchestrator::with_parts(
            self.config.clone(),
            Self::identity(),
            self.service.clone(),
            store,
            &policy,
            tier,
        )
    }

    pub fn file(name: &str, size: usize) -> DetectionPayload {
        DetectionPayload::file(name, vec![0u8; size])
    }
}
