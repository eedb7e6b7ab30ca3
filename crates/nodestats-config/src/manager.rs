use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::{parse_str, Config, ConfigError};

/// Holds the active configuration snapshot.
///
/// Readers call [`ConfigManager::get`] once per cycle and work against that
/// snapshot. Reloads build a complete new snapshot and swap it in; nothing is
/// ever mutated in place.
pub struct ConfigManager<T: Config> {
    config: ArcSwap<T>,
    path: Option<PathBuf>,
}

impl<T: Config> ConfigManager<T> {
    pub fn new(config: T) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            path: None,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = read_config::<T>(path)?;
        Ok(Self {
            config: ArcSwap::from_pointee(config),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn get(&self) -> Arc<T> {
        self.config.load_full()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn update(&self, new_config: T) -> Result<(), ConfigError> {
        new_config.validate()?;
        self.config.store(Arc::new(new_config));
        Ok(())
    }

    /// Re-read the backing file and replace the snapshot wholesale.
    ///
    /// On any error the current snapshot stays installed.
    pub fn reload(&self) -> Result<(), ConfigError> {
        if let Some(ref path) = self.path {
            let new_config = read_config::<T>(path)?;
            self.config.store(Arc::new(new_config));
            tracing::info!(path = %path.display(), "config reloaded");
        }
        Ok(())
    }
}

fn read_config<T: Config>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::from_toml_value;
    use serde::Deserialize;
    use std::fs;

    #[derive(Debug, Clone, Deserialize)]
    struct Limits {
        capacity: usize,
        #[serde(default)]
        labels: Vec<String>,
    }

    impl Config for Limits {
        fn from_toml(value: &toml::Value) -> Result<Self, ConfigError> {
            from_toml_value(value)
        }

        fn validate(&self) -> Result<(), ConfigError> {
            if self.capacity == 0 {
                return Err(ConfigError::invalid("capacity", "must be positive"));
            }
            Ok(())
        }
    }

    fn temp_config(name: &str, content: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("nodestats-config-manager-test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_and_get() {
        let path = temp_config("load.toml", "capacity = 10\nlabels = [\"a\"]\n");
        let manager = ConfigManager::<Limits>::load(&path).unwrap();
        assert_eq!(manager.get().capacity, 10);
        assert_eq!(manager.get().labels, vec!["a".to_string()]);
        assert_eq!(manager.path(), Some(path.as_path()));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_reload_replaces_snapshot() {
        let path = temp_config("reload.toml", "capacity = 10\nlabels = [\"a\", \"b\"]\n");
        let manager = ConfigManager::<Limits>::load(&path).unwrap();
        let before = manager.get();

        fs::write(&path, "capacity = 20\n").unwrap();
        manager.reload().unwrap();

        // The old snapshot is untouched; the new one carries no leftovers.
        assert_eq!(before.capacity, 10);
        assert_eq!(before.labels.len(), 2);
        let after = manager.get();
        assert_eq!(after.capacity, 20);
        assert!(after.labels.is_empty());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_reload_keeps_snapshot_on_error() {
        let path = temp_config("reload-bad.toml", "capacity = 5\n");
        let manager = ConfigManager::<Limits>::load(&path).unwrap();

        fs::write(&path, "capacity = 0\n").unwrap();
        assert!(manager.reload().is_err());
        assert_eq!(manager.get().capacity, 5);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_update_validates() {
        let manager = ConfigManager::new(Limits {
            capacity: 1,
            labels: vec![],
        });
        let bad = Limits {
            capacity: 0,
            labels: vec![],
        };
        assert!(manager.update(bad).is_err());
        assert_eq!(manager.get().capacity, 1);

        let good = Limits {
            capacity: 7,
            labels: vec![],
        };
        manager.update(good).unwrap();
        assert_eq!(manager.get().capacity, 7);
    }

    #[test]
    fn test_reload_without_path_is_noop() {
        let manager = ConfigManager::new(Limits {
            capacity: 3,
            labels: vec![],
        });
        manager.reload().unwrap();
        assert_eq!(manager.get().capacity, 3);
    }
}
