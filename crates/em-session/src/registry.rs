use em_api_types::BackendInfo;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

use crate::WalletBackend;

static INSTALLED: OnceLock<Arc<ProviderRegistry>> = OnceLock::new();

/// Connectable wallet backends, in chooser order.
#[derive(Default)]
pub struct ProviderRegistry {
    backends: Vec<Arc<dyn WalletBackend>>,
}

impl ProviderRegistry {
    /// Registers a backend; a later registration with the same id replaces the earlier one.
    pub fn register(&mut self, backend: Arc<dyn WalletBackend>) {
        let id = backend.info().id;
        self.backends.retain(|existing| existing.info().id != id);
        self.backends.push(backend);
    }

    pub fn with(mut self, backend: Arc<dyn WalletBackend>) -> Self {
        self.register(backend);
        self
    }

    pub fn backend(&self, id: &str) -> Option<Arc<dyn WalletBackend>> {
        self.backends
            .iter()
            .find(|backend| backend.info().id == id)
            .cloned()
    }

    pub fn descriptors(&self) -> Vec<BackendInfo> {
        self.backends.iter().map(|backend| backend.info()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

/// Installs the process-wide registry. Only the first call takes effect;
/// later calls return the registry that is already installed.
pub fn install(registry: ProviderRegistry) -> Arc<ProviderRegistry> {
    let candidate = Arc::new(registry);
    let installed = INSTALLED.get_or_init(|| candidate.clone());
    if Arc::ptr_eq(installed, &candidate) {
        info!(backends = installed.backends.len(), "wallet provider registry installed");
    } else {
        warn!("wallet provider registry already installed; keeping the first one");
    }
    installed.clone()
}

pub fn installed() -> Option<Arc<ProviderRegistry>> {
    INSTALLED.get().cloned()
}
