use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;

/// Per-tenant engines, keyed by the sanitized database name of the connection.
/// Each tenant has its own WAL file and compactor task.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

/// Keep only characters that are safe in a file name.
fn sanitize(tenant: &str) -> io::Result<String> {
    if tenant.len() > MAX_TENANT_NAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "tenant name too long",
        ));
    }
    let safe: String = tenant
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if safe.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "empty tenant name",
        ));
    }
    Ok(safe)
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// Engine for `tenant`, loading it from its WAL on first use.
    pub fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Engine>> {
        let safe_name = sanitize(tenant)?;
        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(engine.value().clone());
        }

        if self.engines.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }

        // The entry holds its shard locked, so two first connections to the
        // same tenant cannot open the WAL twice.
        let engine = match self.engines.entry(safe_name.clone()) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(e) => {
                let engine = Arc::new(Engine::new(self.data_dir.join(format!("{safe_name}.wal")))?);
                tokio::spawn(compactor::run_compactor(engine.clone(), self.compact_threshold));
                e.insert(engine.clone());
                engine
            }
        };

        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        tracing::info!("tenant {safe_name} loaded");
        Ok(engine)
    }
}
