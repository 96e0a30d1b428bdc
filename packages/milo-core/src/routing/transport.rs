//! Client for the multiroom audio transport's JSON-RPC control endpoint.
//!
//! The transport is an external process listening on a fixed loopback
//! address; the routing engine only needs two calls: list groups and bind a
//! group to the unified meta-stream.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::error::{MiloError, MiloResult};

/// One playback group as reported by `Server.GetStatus`.
#[derive(Debug, Clone, Deserialize)]
pub struct TransportGroup {
    pub id: String,
}

#[derive(Deserialize)]
struct StatusResult {
    #[serde(default)]
    groups: Vec<TransportGroup>,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<serde_json::Value>,
}

/// Control-plane access to the multiroom transport. Abstracted so routing
/// logic can be tested without a live transport process.
#[async_trait]
pub trait TransportClient: Send + Sync {
    async fn get_status(&self) -> MiloResult<Vec<TransportGroup>>;
    async fn set_stream(&self, group_id: &str, stream_id: &str) -> MiloResult<()>;
    async fn set_volume(&self, group_id: &str, pct: u8) -> MiloResult<()>;
}

/// JSON-RPC client speaking to the transport over `reqwest`.
pub struct HttpTransportClient {
    client: Client,
    endpoint: String,
}

impl HttpTransportClient {
    #[must_use]
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> MiloResult<T> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| MiloError::Routing(format!("transport RPC {method} failed: {e}")))?;

        let parsed: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| MiloError::Routing(format!("transport RPC {method} bad response: {e}")))?;

        if let Some(err) = parsed.error {
            return Err(MiloError::Routing(format!("transport RPC {method} error: {err}")));
        }
        parsed
            .result
            .ok_or_else(|| MiloError::Routing(format!("transport RPC {method} missing result")))
    }
}

#[async_trait]
impl TransportClient for HttpTransportClient {
    async fn get_status(&self) -> MiloResult<Vec<TransportGroup>> {
        let result: StatusResult = self.call("Server.GetStatus", json!({})).await?;
        Ok(result.groups)
    }

    async fn set_stream(&self, group_id: &str, stream_id: &str) -> MiloResult<()> {
        let _: serde_json::Value = self
            .call(
                "Group.SetStream",
                json!({ "id": group_id, "stream_id": stream_id }),
            )
            .await?;
        Ok(())
    }

    async fn set_volume(&self, group_id: &str, pct: u8) -> MiloResult<()> {
        let _: serde_json::Value = self
            .call("Group.SetVolume", json!({ "id": group_id, "volume": pct }))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
pub mod fake {
    use super::{MiloResult, TransportClient, TransportGroup};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    pub struct FakeTransportClient {
        pub groups: Vec<TransportGroup>,
        pub set_stream_calls: Mutex<Vec<(String, String)>>,
        pub set_volume_calls: Mutex<Vec<(String, u8)>>,
        pub fail: bool,
    }

    impl FakeTransportClient {
        pub fn with_groups(ids: &[&str]) -> Self {
            Self {
                groups: ids
                    .iter()
                    .map(|id| TransportGroup { id: (*id).to_string() })
                    .collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl TransportClient for FakeTransportClient {
        async fn get_status(&self) -> MiloResult<Vec<TransportGroup>> {
            if self.fail {
                return Err(crate::error::MiloError::Routing("fake failure".into()));
            }
            Ok(self.groups.clone())
        }

        async fn set_stream(&self, group_id: &str, stream_id: &str) -> MiloResult<()> {
            if self.fail {
                return Err(crate::error::MiloError::Routing("fake failure".into()));
            }
            self.set_stream_calls
                .lock()
                .push((group_id.to_string(), stream_id.to_string()));
            Ok(())
        }

        async fn set_volume(&self, group_id: &str, pct: u8) -> MiloResult<()> {
            if self.fail {
                return Err(crate::error::MiloError::Routing("fake failure".into()));
            }
            self.set_volume_calls.lock().push((group_id.to_string(), pct));
            Ok(())
        }
    }
}
