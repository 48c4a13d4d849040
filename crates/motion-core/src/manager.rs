// DataManager: resolve dataset keys to verified filesystem paths
//
// Keys are paths relative to a data root, e.g. `scenes/train.zarr`.
// The root comes from the caller or from the `L5KIT_DATA_FOLDER`
// environment variable.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment variable consulted by [`LocalDataManager::from_env`].
pub const DATA_FOLDER_ENV: &str = "L5KIT_DATA_FOLDER";

/// Anything that can turn a dataset key into an existing path.
pub trait DataManager: Send + Sync {
    /// Resolve `key`, failing with [`Error::PathNotFound`] when nothing exists
    /// at the resolved location.
    fn require(&self, key: &str) -> Result<PathBuf>;

    /// The root keys are resolved against.
    fn root(&self) -> &Path;
}

/// Resolves keys against a local directory.
#[derive(Debug, Clone)]
pub struct LocalDataManager {
    root: PathBuf,
}

impl LocalDataManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Build from [`DATA_FOLDER_ENV`].
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(DATA_FOLDER_ENV) {
            Some(root) => Ok(Self::new(PathBuf::from(root))),
            None => Err(Error::Config(format!(
                "no data root given and {DATA_FOLDER_ENV} is not set"
            ))),
        }
    }
}

impl DataManager for LocalDataManager {
    fn require(&self, key: &str) -> Result<PathBuf> {
        let key_path = Path::new(key);
        if key_path.is_absolute() && key_path.exists() {
            return Ok(key_path.to_path_buf());
        }
        let candidate = self.root.join(key_path);
        if candidate.exists() {
            tracing::debug!(key, path = %candidate.display(), "resolved dataset key");
            Ok(candidate)
        } else {
            Err(Error::PathNotFound {
                key: key.to_string(),
                root: self.root.clone(),
            })
        }
    }

    fn root(&self) -> &Path {
        &self.root
    }
}
