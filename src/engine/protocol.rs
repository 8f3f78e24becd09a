//! 引擎行协议的消息结构
//!
//! 请求为单行 JSON-RPC 2.0：`{"jsonrpc":"2.0","id":N,"method":"...","params":{...}}`。
//! method / params / result / error 对本层都是透传数据，不解释其内部结构。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::InspectorError;

/// 调用具名工具所用的方法名
pub const TOOL_CALL_METHOD: &str = "tools/call";

/// 发往引擎 stdin 的请求行
#[derive(Debug, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: &'a Value,
}

impl<'a> RpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: &'a Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }

    /// 序列化为带换行的一帧
    pub fn to_line(&self) -> Result<String, InspectorError> {
        let mut line = serde_json::to_string(self)
            .map_err(|e| InspectorError::Transport(format!("serialize request: {}", e)))?;
        line.push('\n');
        Ok(line)
    }
}

/// 引擎返回的 error 对象
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RpcErrorObject {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
}

/// 已按 id 匹配前的响应行
#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    /// 带 method 的是对端发来的请求或通知，不是响应
    #[serde(default)]
    pub method: Option<String>,
}

impl RpcResponse {
    /// 数字 id，或可解析为数字的字符串 id；其他形式视为无 id
    pub fn numeric_id(&self) -> Option<u64> {
        match self.id.as_ref()? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// 把响应折叠成调用结果：带 error 指示则失败，否则返回 result（缺省为 null）
    pub fn into_outcome(self, id: u64) -> Result<Value, InspectorError> {
        match self.error {
            Some(Value::Null) | None => Ok(self.result.unwrap_or(Value::Null)),
            Some(err) => {
                let (code, message) = match serde_json::from_value::<RpcErrorObject>(err.clone()) {
                    Ok(obj) if !obj.message.is_empty() => (obj.code, obj.message),
                    Ok(obj) => (obj.code, err.to_string()),
                    Err(_) => (None, err.as_str().map(str::to_string).unwrap_or_else(|| err.to_string())),
                };
                Err(InspectorError::Remote { id, code, message })
            }
        }
    }
}

/// 解包 tools/call 的返回：取第一段 text 内容，能解析为 JSON 就返回结构化数据，否则原样返回文本。
/// 没有 text 内容（如图片）时返回整个 result。
pub fn unwrap_tool_result(id: u64, result: Value) -> Result<Value, InspectorError> {
    let text = result
        .get("content")
        .and_then(Value::as_array)
        .and_then(|items| {
            items.iter().find_map(|item| {
                let is_text = item.get("type").and_then(Value::as_str).unwrap_or("text") == "text";
                if is_text {
                    item.get("text").and_then(Value::as_str)
                } else {
                    None
                }
            })
        })
        .map(str::to_string);

    let is_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    match text {
        Some(text) if is_error => Err(InspectorError::Remote {
            id,
            code: None,
            message: text,
        }),
        Some(text) => Ok(serde_json::from_str(&text).unwrap_or(Value::String(text))),
        None if is_error => Err(InspectorError::Remote {
            id,
            code: None,
            message: result.to_string(),
        }),
        None => Ok(result),
    }
}
