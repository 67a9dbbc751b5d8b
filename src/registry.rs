//! Process-wide configuration registry.
//!
//! GUI panels and scripts refer to configuration tables by name
//! (`configuration("high_speed_chopper_modes")`); the registry memoizes the
//! loaded handles so every caller shares the same table and bank. It is
//! created lazily on first use and can be cleared on shutdown (or between
//! tests).
//!
//! Settings files live in a single directory, one per configuration, named
//! `<name>_settings.txt`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::Lazy;

use crate::error::TableResult;
use crate::motor::MotorBank;
use crate::proxy::ConfigurationHandle;

struct RegistryInner {
    settings_dir: PathBuf,
    default_bank: Arc<MotorBank>,
    configurations: HashMap<String, Arc<ConfigurationHandle>>,
}

/// The named-configuration registry.
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

static REGISTRY: Lazy<Registry> = Lazy::new(|| Registry {
    inner: Mutex::new(RegistryInner {
        settings_dir: PathBuf::from("settings"),
        default_bank: Arc::new(MotorBank::new()),
        configurations: HashMap::new(),
    }),
});

impl Registry {
    /// The process-wide registry.
    pub fn global() -> &'static Registry {
        &REGISTRY
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Directory holding the settings files. Already-loaded configurations
    /// are unaffected.
    pub fn set_settings_dir(&self, dir: impl Into<PathBuf>) {
        self.lock().settings_dir = dir.into();
    }

    /// Motor bank handed to configurations loaded after this call.
    pub fn set_default_bank(&self, bank: Arc<MotorBank>) {
        self.lock().default_bank = bank;
    }

    /// Settings-file path for a configuration name.
    pub fn settings_path(&self, name: &str) -> PathBuf {
        self.lock().settings_dir.join(format!("{name}_settings.txt"))
    }

    /// Load (or return the memoized) configuration by name.
    pub fn configuration(&self, name: &str) -> TableResult<Arc<ConfigurationHandle>> {
        let (path, bank) = {
            let inner = self.lock();
            if let Some(handle) = inner.configurations.get(name) {
                return Ok(Arc::clone(handle));
            }
            (
                inner.settings_dir.join(format!("{name}_settings.txt")),
                Arc::clone(&inner.default_bank),
            )
        };
        // Load outside the lock: parsing can be slow and may itself log.
        let handle = ConfigurationHandle::load(name, path, bank)?;
        let mut inner = self.lock();
        let entry = inner
            .configurations
            .entry(name.to_string())
            .or_insert_with(|| Arc::clone(&handle));
        Ok(Arc::clone(entry))
    }

    /// Forget all loaded configurations (shutdown or test isolation).
    /// Outstanding handles stay valid; the next lookup reloads from disk.
    pub fn clear(&self) {
        self.lock().configurations.clear();
    }
}

/// Shorthand for [`Registry::configuration`] on the global registry.
pub fn configuration(name: &str) -> TableResult<Arc<ConfigurationHandle>> {
    Registry::global().configuration(name)
}

/// Shorthand for resolving a settings path on the global registry.
pub fn settings_path(name: &str) -> PathBuf {
    Registry::global().settings_path(name)
}

/// True when a settings file exists for the name.
pub fn settings_exist(name: &str) -> bool {
    settings_path(name).exists()
}
