//! Process-wide tool cache with lazy, single-flight initialization

use crate::error::{Result, ToolError};
use crate::tools::{Tool, ToolProvisioner};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;

/// Immutable tool list shared by every agent run
pub type ToolSet = Arc<[Arc<dyn Tool>]>;

/// Holds the provisioned tool set once a provisioning attempt succeeds.
///
/// Reads after the first success never lock. Initialization is
/// double-checked under `init_lock`, so at most one attempt runs at a time.
/// Callers that were waiting on an attempt share its outcome; a failed
/// attempt leaves the slot empty and the next request starts a new one.
pub struct ToolCache {
    ready: OnceLock<ToolSet>,
    init_lock: Mutex<()>,
    attempts: AtomicU64,
    provisioner: Arc<dyn ToolProvisioner>,
}

impl ToolCache {
    pub fn new(provisioner: Arc<dyn ToolProvisioner>) -> Self {
        Self {
            ready: OnceLock::new(),
            init_lock: Mutex::new(()),
            attempts: AtomicU64::new(0),
            provisioner,
        }
    }

    /// The cached tool set, without triggering initialization
    pub fn get(&self) -> Option<ToolSet> {
        self.ready.get().cloned()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.get().is_some()
    }

    /// Number of completed provisioning attempts
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Acquire)
    }

    /// Return the cached tools, provisioning them first if needed
    pub async fn get_or_init(&self) -> Result<ToolSet> {
        if let Some(tools) = self.ready.get() {
            return Ok(Arc::clone(tools));
        }

        let observed = self.attempts.load(Ordering::Acquire);
        let _guard = self.init_lock.lock().await;

        // Another caller may have finished while we waited
        if let Some(tools) = self.ready.get() {
            return Ok(Arc::clone(tools));
        }
        if self.attempts.load(Ordering::Acquire) != observed {
            return Err(ToolError::ProvisioningFailed.into());
        }

        let outcome = self.provisioner.provision().await;
        self.attempts.fetch_add(1, Ordering::AcqRel);

        match outcome {
            Some(tools) => {
                let tools: ToolSet = tools.into();
                // Only the lock holder writes, so the slot is still empty here
                let _ = self.ready.set(Arc::clone(&tools));
                Ok(tools)
            }
            None => Err(ToolError::ProvisioningFailed.into()),
        }
    }
}
