use std::collections::BTreeMap;

use crate::config::NodeConfig;

/// Connection and service context of one node target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observer {
    /// Address of the node's service endpoint (`host:port`).
    pub service: String,
    pub cluster_name: Option<String>,
    /// Static labels appended to every metric from this target.
    pub labels: BTreeMap<String, String>,
}

impl Observer {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            cluster_name: None,
            labels: BTreeMap::new(),
        }
    }

    pub fn with_cluster_name(mut self, cluster_name: impl Into<String>) -> Self {
        self.cluster_name = Some(cluster_name.into());
        self
    }

    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    pub fn from_config(config: &NodeConfig) -> Self {
        Self {
            service: config.service.clone(),
            cluster_name: config.cluster_name.clone(),
            labels: config.labels.clone(),
        }
    }
}
