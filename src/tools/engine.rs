//! 引擎透传工具：把具名工具调用原样转发给自动化引擎

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::core::InspectorError;
use crate::engine::RpcClient;
use crate::tools::schema::{args_schema, parse_args};
use crate::tools::Tool;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EngineToolArgs {
    /// 引擎侧的工具名
    pub tool: String,
    #[serde(default = "empty_object")]
    pub arguments: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

pub struct EngineTool {
    client: Arc<RpcClient>,
}

impl EngineTool {
    pub fn new(client: Arc<RpcClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for EngineTool {
    fn name(&self) -> &str {
        "engine_tool"
    }

    fn description(&self) -> &str {
        "Invoke a named capability on the automation engine. Args: {\"tool\": \"...\", \"arguments\": {...}}"
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<EngineToolArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, InspectorError> {
        let args: EngineToolArgs = parse_args(args)?;
        tracing::info!(tool = %args.tool, "engine tool invoke");
        self.client.call_tool(&args.tool, args.arguments).await
    }
}
