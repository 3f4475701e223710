//! # Configuration
//!
//! Runtime knobs for an [`EntitySystem`](crate::EntitySystem) and its
//! [`JobQueue`](crate::JobQueue), loaded once at startup.
//!
//! ```toml
//! default_chunk_size = 512
//! destroy_replaced_components = true
//! job_workers = 4
//!
//! [chunk_sizes]
//! Position = 4096
//! Health = 64
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::ecs::DEFAULT_CHUNK_SIZE;
use crate::error::{EcsError, EcsResult};

/// Entity system configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SystemConfig {
    /// Chunk size for families that neither declare one nor appear in
    /// `chunk_sizes`.
    pub default_chunk_size: usize,
    /// Per-family chunk size overrides, keyed by [`Component::NAME`](crate::Component::NAME).
    pub chunk_sizes: HashMap<String, usize>,
    /// Destroy a component when attaching another of the same family
    /// replaces it. When false the old component is only detached.
    pub destroy_replaced_components: bool,
    /// Worker threads for the job queue. 0 picks one per core plus one.
    pub job_workers: usize,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            default_chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_sizes: HashMap::new(),
            destroy_replaced_components: false,
            job_workers: 0,
        }
    }
}

impl SystemConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidConfig`] on malformed TOML or a zero chunk size.
    pub fn from_toml_str(text: &str) -> EcsResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| EcsError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidConfig`] if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> EcsResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EcsError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidConfig`] naming the offending setting.
    pub fn validate(&self) -> EcsResult<()> {
        if self.default_chunk_size == 0 {
            return Err(EcsError::InvalidConfig(
                "default_chunk_size must be greater than zero".to_string(),
            ));
        }
        if let Some((name, _)) = self.chunk_sizes.iter().find(|(_, size)| **size == 0) {
            return Err(EcsError::InvalidConfig(format!(
                "chunk size for `{name}` must be greater than zero"
            )));
        }
        Ok(())
    }

    /// Chunk size to use for a family.
    ///
    /// An explicit override wins, then the type's own preference, then the
    /// configured default.
    #[must_use]
    pub fn chunk_size_for(&self, name: &str, preferred: usize) -> usize {
        if let Some(size) = self.chunk_sizes.get(name) {
            return *size;
        }
        if preferred != DEFAULT_CHUNK_SIZE && preferred > 0 {
            return preferred;
        }
        self.default_chunk_size
    }
}
