use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    error::KeypomError,
    http_request::Request,
    primitives::{AccountId, Balance},
};

use super::ViewClient;

/// A [`ViewClient`] over NEAR's JSON-RPC `query` endpoint, reading at `final` finality.
pub struct RpcClient {
    url: String,
    request: Request,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient").field("url", &self.url).finish()
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CallFunctionResult {
    #[serde(default)]
    result: Option<Vec<u8>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ViewAccountResult {
    amount: String,
}

impl RpcClient {
    /// A client for the JSON-RPC endpoint at `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request: Request::new(),
        }
    }

    /// The endpoint this client talks to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn query(&self, params: Value) -> Result<Value, KeypomError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": uuid::Uuid::new_v4().to_string(),
            "method": "query",
            "params": params,
        });

        let response = self
            .request
            .handle(self.request.post(&self.url).json(&body))
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(KeypomError::NetworkError {
                url: self.url.clone(),
                status: Some(status.as_u16()),
                error: format!("rpc responded with status {status}"),
            });
        }

        let response: RpcResponse = response.json().await?;
        if let Some(error) = response.error {
            return Err(KeypomError::NetworkError {
                url: self.url.clone(),
                status: Some(status.as_u16()),
                error: error.to_string(),
            });
        }
        response.result.ok_or_else(|| KeypomError::SerializationError {
            error: format!("rpc response from {} has neither result nor error", self.url),
        })
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl ViewClient for RpcClient {
    async fn view_function(
        &self,
        contract_id: &AccountId,
        method_name: &str,
        args: Value,
    ) -> Result<Value, KeypomError> {
        tracing::debug!(contract_id = %contract_id, method_name, "view call");

        let args = serde_json::to_vec(&args)?;
        let result = self
            .query(json!({
                "request_type": "call_function",
                "finality": "final",
                "account_id": contract_id,
                "method_name": method_name,
                "args_base64": STANDARD.encode(args),
            }))
            .await?;

        let result: CallFunctionResult = serde_json::from_value(result)?;
        if let Some(error) = result.error {
            return Err(KeypomError::ContractError {
                contract_id: contract_id.to_string(),
                method_name: method_name.to_string(),
                error,
            });
        }

        let bytes = result.result.unwrap_or_default();
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn account_balance(&self, account_id: &AccountId) -> Result<Balance, KeypomError> {
        let result = self
            .query(json!({
                "request_type": "view_account",
                "finality": "final",
                "account_id": account_id,
            }))
            .await?;

        let account: ViewAccountResult = serde_json::from_value(result)?;
        account
            .amount
            .parse()
            .map_err(|_| KeypomError::SerializationError {
                error: format!("invalid account balance '{}'", account.amount),
            })
    }
}
