//! Remote node client seam and its HTTP implementation.
//!
//! The distributor talks to worker nodes only through [`NodeClient`]; the
//! wire protocol of the sessions themselves is the node's business.
//! Clients are produced by an injected factory and shared across node
//! handles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use serde::Deserialize;
use tracing::debug;

use hivegrid_core::{Capabilities, GridError, GridResult, NodeStatus, Session, SessionId};

/// Client-side view of a single worker node.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Ask the node to create a session for the given capabilities.
    async fn create_session(&self, capabilities: &Capabilities) -> GridResult<Session>;

    /// Fetch the node's current status snapshot. Doubles as the health
    /// probe.
    async fn status(&self) -> GridResult<NodeStatus>;
}

/// Produces (and may share) clients for node uris.
pub trait NodeClientFactory: Send + Sync {
    fn client_for(&self, uri: &str) -> GridResult<Arc<dyn NodeClient>>;
}

/// What a node replies to a create-session call.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionReply {
    session_id: SessionId,
    #[serde(default)]
    capabilities: Capabilities,
}

/// HTTP/1.1 client for a single node, one connection per request.
pub struct HttpNodeClient {
    uri: String,
    authority: String,
}

impl HttpNodeClient {
    pub fn new(uri: &str) -> GridResult<Self> {
        let parsed: http::Uri = uri
            .parse()
            .map_err(|e| GridError::Config(format!("invalid node uri {uri}: {e}")))?;
        let authority = parsed
            .authority()
            .ok_or_else(|| GridError::Config(format!("node uri {uri} has no authority")))?
            .to_string();
        Ok(Self {
            uri: uri.to_string(),
            authority,
        })
    }

    async fn request(&self, method: http::Method, path: &str, body: Bytes) -> GridResult<Bytes> {
        let stream = tokio::net::TcpStream::connect(&self.authority)
            .await
            .map_err(|e| GridError::Internal(format!("connect {}: {e}", self.authority)))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| GridError::Internal(format!("handshake {}: {e}", self.authority)))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method(method)
            .uri(format!("{}{path}", self.uri))
            .header("host", &self.authority)
            .header("content-type", "application/json")
            .body(Full::new(body))
            .map_err(|e| GridError::Internal(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| GridError::Internal(format!("request {}: {e}", self.authority)))?;

        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| GridError::Internal(e.to_string()))?
            .to_bytes();

        if !status.is_success() {
            return Err(GridError::Internal(format!(
                "node {} replied {status}",
                self.authority
            )));
        }
        Ok(body)
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn create_session(&self, capabilities: &Capabilities) -> GridResult<Session> {
        let payload = serde_json::to_vec(capabilities)
            .map_err(|e| GridError::Internal(e.to_string()))?;

        let body = self
            .request(http::Method::POST, "/session", Bytes::from(payload))
            .await
            .map_err(|e| GridError::SessionNotCreated(e.to_string()))?;

        let reply: CreateSessionReply = serde_json::from_slice(&body)
            .map_err(|e| GridError::SessionNotCreated(format!("bad reply from node: {e}")))?;

        debug!(session_id = %reply.session_id, uri = %self.uri, "session created on node");
        Ok(Session {
            id: reply.session_id,
            uri: self.uri.clone(),
            capabilities: reply.capabilities,
        })
    }

    async fn status(&self) -> GridResult<NodeStatus> {
        let body = self
            .request(http::Method::GET, "/status", Bytes::new())
            .await?;
        serde_json::from_slice(&body)
            .map_err(|e| GridError::Internal(format!("bad status from node: {e}")))
    }
}

/// Factory that caches one [`HttpNodeClient`] per uri.
pub struct HttpClientFactory {
    clients: Mutex<HashMap<String, Arc<HttpNodeClient>>>,
}

impl HttpClientFactory {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for HttpClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeClientFactory for HttpClientFactory {
    fn client_for(&self, uri: &str) -> GridResult<Arc<dyn NodeClient>> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = clients.get(uri) {
            return Ok(existing.clone());
        }
        let client = Arc::new(HttpNodeClient::new(uri)?);
        clients.insert(uri.to_string(), client.clone());
        Ok(client)
    }
}
