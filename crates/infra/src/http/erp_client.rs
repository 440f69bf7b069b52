//! JSON-RPC 2.0 `ErpClient` talking to Odoo's `/jsonrpc` endpoint (§4.2).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use poller_core::{ErpClient, ErpClientFactory, ErpRecord};
use poller_domain::{Connection, PollerError, Result};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// One connection's JSON-RPC client: its own `reqwest::Client` and cached
/// session uid (§5, §4.7 step 2).
pub struct JsonRpcErpClient {
    http: Client,
    base_url: String,
    db: String,
    username: String,
    api_key: String,
    uid: RwLock<Option<i64>>,
}

impl JsonRpcErpClient {
    pub fn new(connection: &Connection) -> Result<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|err| PollerError::Transport(err.to_string()))?;

        Ok(Self {
            http,
            base_url: connection.odoo_url.trim_end_matches('/').to_string(),
            db: connection.odoo_db.clone(),
            username: connection.odoo_username.clone(),
            api_key: connection.odoo_api_key.clone(),
            uid: RwLock::new(None),
        })
    }

    async fn rpc_call(&self, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": params,
        });

        let url = format!("{}/jsonrpc", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|err| PollerError::Transport(err.to_string()))?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(PollerError::RateLimited);
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|err| PollerError::Transport(err.to_string()))?;

        if let Some(error) = envelope.get("error") {
            return Err(classify_rpc_error(error));
        }

        Ok(envelope.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn authenticate_uid(&self) -> Result<i64> {
        let result = self
            .rpc_call(json!({
                "service": "common",
                "method": "authenticate",
                "args": [self.db, self.username, self.api_key, {}],
            }))
            .await?;

        match result.as_i64() {
            Some(uid) if uid > 0 => Ok(uid),
            _ => Err(PollerError::Auth("credentials rejected".to_string())),
        }
    }

    async fn execute_kw(&self, model: &str, method: &str, args: Value, kwargs: Value) -> Result<Value> {
        let uid = self.current_uid().await?;

        let call = async {
            self.rpc_call(json!({
                "service": "object",
                "method": "execute_kw",
                "args": [self.db, uid, self.api_key, model, method, args, kwargs],
            }))
            .await
        };

        match call.await {
            Err(PollerError::Auth(_)) => {
                debug!(model, method, "session expired; re-authenticating once");
                let fresh_uid = self.authenticate_uid().await?;
                *self.uid.write().await = Some(fresh_uid);
                self.rpc_call(json!({
                    "service": "object",
                    "method": "execute_kw",
                    "args": [self.db, fresh_uid, self.api_key, model, method, args, kwargs],
                }))
                .await
            }
            other => other,
        }
    }

    async fn current_uid(&self) -> Result<i64> {
        if let Some(uid) = *self.uid.read().await {
            return Ok(uid);
        }
        let uid = self.authenticate_uid().await?;
        *self.uid.write().await = Some(uid);
        Ok(uid)
    }
}

fn classify_rpc_error(error: &Value) -> PollerError {
    let message = error
        .get("data")
        .and_then(|data| data.get("message"))
        .and_then(Value::as_str)
        .or_else(|| error.get("message").and_then(Value::as_str))
        .unwrap_or("unknown rpc error");

    let lower = message.to_lowercase();
    if lower.contains("session") || lower.contains("access denied") {
        PollerError::Auth(message.to_string())
    } else {
        PollerError::Rpc(message.to_string())
    }
}

fn records_from_value(value: Value) -> Vec<ErpRecord> {
    match value {
        Value::Array(items) => items.into_iter().filter_map(|item| item.as_object().cloned()).collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl ErpClient for JsonRpcErpClient {
    async fn authenticate(&self) -> Result<i64> {
        let uid = self.authenticate_uid().await?;
        *self.uid.write().await = Some(uid);
        Ok(uid)
    }

    async fn search_read(
        &self,
        model: &str,
        domain: Value,
        fields: &[&str],
        limit: i64,
        order: &str,
    ) -> Result<Vec<ErpRecord>> {
        let mut kwargs = serde_json::Map::new();
        kwargs.insert("fields".to_string(), json!(fields));
        if limit > 0 {
            kwargs.insert("limit".to_string(), json!(limit));
        }
        if !order.is_empty() {
            kwargs.insert("order".to_string(), json!(order));
        }

        let result =
            self.execute_kw(model, "search_read", json!([domain]), Value::Object(kwargs)).await?;
        Ok(records_from_value(result))
    }

    async fn read(&self, model: &str, ids: &[i64], fields: &[&str]) -> Result<Vec<ErpRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let kwargs = json!({ "fields": fields });
        let result = self.execute_kw(model, "read", json!([ids]), kwargs).await?;
        Ok(records_from_value(result))
    }
}

/// Builds one `JsonRpcErpClient` per connection, so each tenant owns its own
/// transport and cached session (§5).
pub struct JsonRpcErpClientFactory;

impl ErpClientFactory for JsonRpcErpClientFactory {
    fn build(&self, connection: &Connection) -> Result<Arc<dyn ErpClient>> {
        Ok(Arc::new(JsonRpcErpClient::new(connection)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_session_errors_as_auth() {
        let error = json!({"data": {"message": "Session expired"}, "message": "generic"});
        assert!(matches!(classify_rpc_error(&error), PollerError::Auth(_)));
    }

    #[test]
    fn classifies_access_denied_as_auth() {
        let error = json!({"message": "Access Denied"});
        assert!(matches!(classify_rpc_error(&error), PollerError::Auth(_)));
    }

    #[test]
    fn classifies_other_errors_as_rpc() {
        let error = json!({"message": "ValidationError: field required"});
        assert!(matches!(classify_rpc_error(&error), PollerError::Rpc(_)));
    }

    #[test]
    fn falls_back_to_top_level_message_when_data_absent() {
        let error = json!({"message": "session invalid"});
        assert!(matches!(classify_rpc_error(&error), PollerError::Auth(_)));
    }
}
