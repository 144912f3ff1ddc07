//! Store connection configuration.
//!
//! Carries the cluster file path (for networked backends) and the two
//! logical namespace names that keep saga and timeout keys apart in a
//! shared keyspace. Built either programmatically through
//! [`ConnectionConfigBuilder`] or from a `key=value;` connection string.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::keys::Subspace;

const DEFAULT_SAGA_SPACE: &str = "Sagas";
const DEFAULT_TIMEOUT_SPACE: &str = "Timeouts";

/// Connection parameters for the underlying store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Cluster file path for networked backends; ignored by the embedded
    /// in-memory store.
    pub cluster_file: Option<PathBuf>,
    /// Namespace for saga records and their unique indexes.
    pub saga_space: String,
    /// Namespace for timeout records and their indexes.
    pub timeout_space: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            cluster_file: None,
            saga_space: DEFAULT_SAGA_SPACE.to_string(),
            timeout_space: DEFAULT_TIMEOUT_SPACE.to_string(),
        }
    }
}

impl ConnectionConfig {
    /// Start building a configuration.
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }

    /// Parse a `key=value` connection string with `;` separators.
    ///
    /// Recognized keys: `clusterFilePath`, `sagaStore`, `timeoutStore`.
    /// Unknown keys are ignored; missing keys keep their defaults.
    pub fn from_connection_string(connection_string: &str) -> Result<Self> {
        let mut builder = ConnectionConfigBuilder::default();
        for fragment in connection_string.split(';') {
            let fragment = fragment.trim();
            if fragment.is_empty() {
                continue;
            }
            let (key, value) = match fragment.split_once('=') {
                Some((key, value)) => (key.trim(), value.trim()),
                None => (fragment, ""),
            };
            builder = match key {
                "clusterFilePath" => builder.cluster_file(value)?,
                "sagaStore" => builder.saga_space(value)?,
                "timeoutStore" => builder.timeout_space(value)?,
                _ => builder,
            };
        }
        Ok(builder.build())
    }

    /// Namespace for saga keys.
    pub fn saga_subspace(&self) -> Subspace {
        Subspace::new(&self.saga_space)
    }

    /// Namespace for timeout keys.
    pub fn timeout_subspace(&self) -> Subspace {
        Subspace::new(&self.timeout_space)
    }
}

/// Builder for [`ConnectionConfig`] with non-empty validation.
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfigBuilder {
    cluster_file: Option<PathBuf>,
    saga_space: Option<String>,
    timeout_space: Option<String>,
}

impl ConnectionConfigBuilder {
    /// Set the cluster file path.
    pub fn cluster_file(mut self, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(Error::Config {
                reason: "cluster file path cannot be empty".to_string(),
            });
        }
        self.cluster_file = Some(path);
        Ok(self)
    }

    /// Set the saga namespace name.
    pub fn saga_space(mut self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::Config {
                reason: "saga store namespace cannot be empty".to_string(),
            });
        }
        self.saga_space = Some(name);
        Ok(self)
    }

    /// Set the timeout namespace name.
    pub fn timeout_space(mut self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::Config {
                reason: "timeout store namespace cannot be empty".to_string(),
            });
        }
        self.timeout_space = Some(name);
        Ok(self)
    }

    /// Finish, applying defaults for anything unset.
    pub fn build(self) -> ConnectionConfig {
        ConnectionConfig {
            cluster_file: self.cluster_file,
            saga_space: self
                .saga_space
                .unwrap_or_else(|| DEFAULT_SAGA_SPACE.to_string()),
            timeout_space: self
                .timeout_space
                .unwrap_or_else(|| DEFAULT_TIMEOUT_SPACE.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.saga_space, "Sagas");
        assert_eq!(config.timeout_space, "Timeouts");
        assert!(config.cluster_file.is_none());
    }

    #[test]
    fn parses_connection_string() {
        let config = ConnectionConfig::from_connection_string(
            "clusterFilePath=/etc/fdb.cluster; sagaStore=MySagas; timeoutStore=MyTimeouts",
        )
        .expect("parse");
        assert_eq!(config.cluster_file, Some(PathBuf::from("/etc/fdb.cluster")));
        assert_eq!(config.saga_space, "MySagas");
        assert_eq!(config.timeout_space, "MyTimeouts");
    }

    #[test]
    fn unknown_and_missing_keys_keep_defaults() {
        let config =
            ConnectionConfig::from_connection_string("someOtherSetting=1;;").expect("parse");
        assert_eq!(config, ConnectionConfig::default());
    }

    #[test]
    fn empty_namespace_is_rejected() {
        assert!(ConnectionConfig::builder().saga_space("").is_err());
        assert!(ConnectionConfig::builder().timeout_space("").is_err());
        assert!(ConnectionConfig::builder().cluster_file("").is_err());
        assert!(ConnectionConfig::from_connection_string("sagaStore=").is_err());
    }

    #[test]
    fn distinct_subspaces() {
        let config = ConnectionConfig::default();
        assert_ne!(config.saga_subspace(), config.timeout_subspace());
    }
}
