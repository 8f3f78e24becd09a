//! 设计约束工具：按路径修改、读取当前文档

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::core::InspectorError;
use crate::session::InspectionSession;
use crate::tools::schema::{args_schema, parse_args};
use crate::tools::Tool;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateConstraintArgs {
    /// 点分路径，如 brand.colors.primary
    pub path: String,
    pub value: Value,
    /// set 或 append
    pub operation: String,
    /// 发现依据，如 screen_001
    #[serde(default)]
    pub evidence: Option<String>,
}

pub struct UpdateConstraintTool {
    session: Arc<InspectionSession>,
}

impl UpdateConstraintTool {
    pub fn new(session: Arc<InspectionSession>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Tool for UpdateConstraintTool {
    fn name(&self) -> &str {
        "update_constraint"
    }

    fn description(&self) -> &str {
        "Record a discovered design fact at a dot-separated path (operation: set | append)."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<UpdateConstraintArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, InspectorError> {
        let args: UpdateConstraintArgs = parse_args(args)?;
        let update = self
            .session
            .constraints()
            .update(&args.path, args.value, &args.operation, args.evidence)
            .await?;
        serde_json::to_value(&update).map_err(|e| InspectorError::InvalidResponse(e.to_string()))
    }
}

/// 返回完整约束文档及其摘要
pub struct GetConstraintsTool {
    session: Arc<InspectionSession>,
}

impl GetConstraintsTool {
    pub fn new(session: Arc<InspectionSession>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Tool for GetConstraintsTool {
    fn name(&self) -> &str {
        "get_constraints"
    }

    fn description(&self) -> &str {
        "Return the current design-system document and its summary."
    }

    async fn execute(&self, _args: Value) -> Result<Value, InspectorError> {
        let store = self.session.constraints();
        let document = store.load().await;
        let summary = crate::inspector::DesignSystemSummary::from_document(&document);
        Ok(serde_json::json!({
            "document": document,
            "summary": summary,
        }))
    }
}
