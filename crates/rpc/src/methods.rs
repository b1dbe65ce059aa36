use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::BlockClock;

/// A JSON-RPC 2.0 request. Both `id` and `method` are mandatory.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// A successful JSON-RPC 2.0 response.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RpcResponse {
    pub id: Value,
    pub jsonrpc: &'static str,
    pub result: Value,
}

impl RpcResponse {
    const VERSION: &str = "2.0";

    pub fn new(id: Value, result: Value) -> Self {
        Self {
            id,
            jsonrpc: Self::VERSION,
            result,
        }
    }
}

/// The closed set of methods the node answers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    RpcModules,
    EthBlockNumber,
    EthGetBlockByNumber,
}

impl FromStr for RpcMethod {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rpc_modules" => Ok(Self::RpcModules),
            "eth_blockNumber" => Ok(Self::EthBlockNumber),
            "eth_getBlockByNumber" => Ok(Self::EthGetBlockByNumber),
            _ => Err(RpcError::UnsupportedMethod {
                method: s.to_string(),
            }),
        }
    }
}

/// The block object returned by `eth_getBlockByNumber`. Everything but the number and the
/// timestamp is zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub difficulty: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub number: u64,
    pub size: u64,
    pub timestamp: u64,
    pub total_difficulty: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RpcError {
    /// The body isn't JSON or lacks `id` or `method`.
    BadRequest,
    UnsupportedMethod { method: String },
    InvalidParams { error_cause: String },
}

impl RpcError {
    pub fn status_code(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }

    pub fn error_message(&self) -> &'static str {
        match self {
            RpcError::BadRequest => "Bad JSON-RPC request",
            RpcError::UnsupportedMethod { .. } => "Unsupported method",
            RpcError::InvalidParams { .. } => "Invalid params",
        }
    }
}

impl Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::BadRequest => f.write_str(self.error_message()),
            RpcError::UnsupportedMethod { method } => {
                write!(f, "{}: {method}", self.error_message())
            }
            RpcError::InvalidParams { error_cause } => {
                write!(f, "{}: {error_cause}", self.error_message())
            }
        }
    }
}

impl std::error::Error for RpcError {}

/// Parses and answers one request body.
pub fn handle_request(body: &[u8], clock: &BlockClock) -> Result<RpcResponse, RpcError> {
    let request: RpcRequest = serde_json::from_slice(body).map_err(|error| {
        tracing::debug!(%error, "Rejecting malformed JSON-RPC request");
        RpcError::BadRequest
    })?;
    let method = request.method.parse::<RpcMethod>()?;
    let result = call(method, &request.params, clock)?;
    Ok(RpcResponse::new(request.id, result))
}

pub fn call(method: RpcMethod, params: &Value, clock: &BlockClock) -> Result<Value, RpcError> {
    Ok(match method {
        RpcMethod::RpcModules => serde_json::json!(rpc_modules()),
        RpcMethod::EthBlockNumber => Value::from(clock.block_number()),
        RpcMethod::EthGetBlockByNumber => {
            let number = block_number_param(params.get(0), clock)?;
            let block = block_by_number(number, clock)?;
            serde_json::to_value(block).map_err(|error| RpcError::InvalidParams {
                error_cause: error.to_string(),
            })?
        }
    })
}

pub fn rpc_modules() -> BTreeMap<&'static str, &'static str> {
    BTreeMap::from([
        ("eth", "1.0"),
        ("net", "1.0"),
        ("skale", "0.1"),
        ("web3", "1.0"),
    ])
}

pub fn block_by_number(number: u64, clock: &BlockClock) -> Result<Block, RpcError> {
    let timestamp = number
        .checked_add(clock.start_time())
        .ok_or_else(|| RpcError::InvalidParams {
            error_cause: format!("block number {number} is out of range"),
        })?;
    Ok(Block {
        number,
        timestamp,
        ..Default::default()
    })
}

/// Decodes a block parameter: a hex quantity with or without the `0x` prefix, or one of the
/// `latest`, `pending` and `earliest` tags.
fn block_number_param(param: Option<&Value>, clock: &BlockClock) -> Result<u64, RpcError> {
    let Some(param) = param.and_then(Value::as_str) else {
        return Err(RpcError::InvalidParams {
            error_cause: "expected a block number as the first parameter".to_string(),
        });
    };

    match param {
        "latest" | "pending" => Ok(clock.block_number()),
        "earliest" => Ok(0),
        _ => {
            let digits = param
                .strip_prefix("0x")
                .or_else(|| param.strip_prefix("0X"))
                .unwrap_or(param);
            u64::from_str_radix(digits, 16).map_err(|error| RpcError::InvalidParams {
                error_cause: format!("invalid block number {param:?}: {error}"),
            })
        }
    }
}
