//! The node-client seam.
//!
//! The pipeline only needs "ask the node for these info keys, get back one
//! response string per key". Real clients live outside this crate;
//! [`StaticNodeClient`] serves canned responses for tests and replays.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::error::ClientError;
use crate::RawStatsMap;

/// Synchronous request/response access to one node's info interface.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Fetch the given info keys. Keys the node does not answer are absent
    /// from the result.
    async fn request_info(&self, keys: &[String]) -> Result<HashMap<String, String>, ClientError>;
}

/// Split an info response of the form `k1=v1;k2=v2;` into a stats map.
///
/// Blank segments are ignored, a segment without `=` maps to an empty
/// value, and values may themselves contain `=`.
pub fn parse_info_response(response: &str) -> RawStatsMap {
    response
        .split(';')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .filter_map(|segment| {
            let (key, value) = segment.split_once('=').unwrap_or((segment, ""));
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct CapturedResponses {
    #[serde(default)]
    responses: HashMap<String, String>,
}

/// A client answering from an in-memory table of responses.
#[derive(Debug, Default)]
pub struct StaticNodeClient {
    responses: RwLock<HashMap<String, String>>,
    requests: Mutex<Vec<Vec<String>>>,
}

impl StaticNodeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, key: impl Into<String>, response: impl Into<String>) -> Self {
        self.set_response(key, response);
        self
    }

    pub fn set_response(&self, key: impl Into<String>, response: impl Into<String>) {
        self.responses.write().insert(key.into(), response.into());
    }

    /// Parse a captured dump: a `[responses]` table of info key to response.
    pub fn from_toml_str(content: &str) -> Result<Self, ClientError> {
        let captured: CapturedResponses =
            toml::from_str(content).map_err(|e| ClientError::Load(e.to_string()))?;
        Ok(Self {
            responses: RwLock::new(captured.responses),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Load(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Every key set requested so far, in order.
    pub fn requests(&self) -> Vec<Vec<String>> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl NodeClient for StaticNodeClient {
    async fn request_info(&self, keys: &[String]) -> Result<HashMap<String, String>, ClientError> {
        self.requests.lock().push(keys.to_vec());
        let responses = self.responses.read();
        Ok(keys
            .iter()
            .filter_map(|k| responses.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_info_response() {
        let stats = parse_info_response("cluster_size=3;uptime=100;;flag;ratio=a=b;");
        assert_eq!(stats.len(), 4);
        assert_eq!(stats["cluster_size"], "3");
        assert_eq!(stats["uptime"], "100");
        assert_eq!(stats["flag"], "");
        assert_eq!(stats["ratio"], "a=b");
    }

    #[test]
    fn test_parse_info_response_empty() {
        assert!(parse_info_response("").is_empty());
        assert!(parse_info_response(" ; ;").is_empty());
        assert!(parse_info_response("=orphan").is_empty());
    }

    #[tokio::test]
    async fn test_static_client_answers_known_keys() {
        let client = StaticNodeClient::new().with_response("statistics", "cluster_size=1");
        let keys = vec!["statistics".to_string(), "missing".to_string()];
        let resp = client.request_info(&keys).await.unwrap();
        assert_eq!(resp.len(), 1);
        assert_eq!(resp["statistics"], "cluster_size=1");
        assert_eq!(client.requests(), vec![keys]);
    }

    #[test]
    fn test_static_client_from_toml() {
        let client = StaticNodeClient::from_toml_str(
            r#"
            [responses]
            statistics = "cluster_size=1;uptime=5"
            namespaces = "test"
            "#,
        )
        .unwrap();
        assert_eq!(client.responses.read().len(), 2);
        assert!(StaticNodeClient::from_toml_str("responses = 3").is_err());
    }
}
