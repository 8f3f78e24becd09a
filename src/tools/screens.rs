//! 屏幕相关工具：截图登记、附加发现、比较、列表、清空会话、汇总

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::core::InspectorError;
use crate::inspector::{Finding, FindingCategory, NavigationContext, ScreenId, Severity};
use crate::session::InspectionSession;
use crate::tools::schema::{args_schema, parse_args};
use crate::tools::Tool;

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, InspectorError> {
    serde_json::to_value(value).map_err(|e| InspectorError::InvalidResponse(e.to_string()))
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CaptureScreenArgs {
    /// 屏幕名称，如 "Login"
    #[serde(default)]
    pub label: Option<String>,
    /// 从会话开始到达此屏幕的动作序列
    #[serde(default)]
    pub navigation_path: Vec<String>,
}

/// 截图并登记屏幕；返回 {id, is_new}
pub struct CaptureScreenTool {
    session: Arc<InspectionSession>,
}

impl CaptureScreenTool {
    pub fn new(session: Arc<InspectionSession>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Tool for CaptureScreenTool {
    fn name(&self) -> &str {
        "capture_screen"
    }

    fn description(&self) -> &str {
        "Capture the current screen and register it. Returns the existing id if the screen was already seen."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<CaptureScreenArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, InspectorError> {
        let args: CaptureScreenArgs = parse_args(args)?;
        let registration = self
            .session
            .registry()
            .capture_and_register(NavigationContext {
                label: args.label,
                path: args.navigation_path,
            })
            .await?;
        to_value(&registration)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AttachFindingArgs {
    pub screen_id: String,
    /// consistency / accessibility / system_adherence / usability
    pub category: String,
    /// critical / warning / info
    pub severity: String,
    pub subject: String,
    pub message: String,
    #[serde(default)]
    pub details: BTreeMap<String, Value>,
}

/// 给屏幕附加一条发现
pub struct AttachFindingTool {
    session: Arc<InspectionSession>,
}

impl AttachFindingTool {
    pub fn new(session: Arc<InspectionSession>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Tool for AttachFindingTool {
    fn name(&self) -> &str {
        "attach_finding"
    }

    fn description(&self) -> &str {
        "Attach a quality finding to a registered screen and mark it reviewed."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<AttachFindingArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, InspectorError> {
        let args: AttachFindingArgs = parse_args(args)?;
        let id: ScreenId = args.screen_id.parse()?;
        let category: FindingCategory = args.category.parse()?;
        let severity: Severity = args.severity.parse()?;
        let mut finding = Finding::new(category, severity, args.subject, args.message);
        finding.details = args.details;
        let count = self.session.registry().attach_finding(id, finding).await?;
        Ok(serde_json::json!({ "screen_id": id, "finding_count": count, "reviewed": true }))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CompareScreensArgs {
    pub screen_a: String,
    pub screen_b: String,
}

/// 比较两个已登记的屏幕
pub struct CompareScreensTool {
    session: Arc<InspectionSession>,
}

impl CompareScreensTool {
    pub fn new(session: Arc<InspectionSession>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Tool for CompareScreensTool {
    fn name(&self) -> &str {
        "compare_screens"
    }

    fn description(&self) -> &str {
        "Compare two registered screens: digest distance, structural match and similarity band."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<CompareScreensArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, InspectorError> {
        let args: CompareScreensArgs = parse_args(args)?;
        let a: ScreenId = args.screen_a.parse()?;
        let b: ScreenId = args.screen_b.parse()?;
        let comparison = self.session.registry().compare(a, b).await?;
        to_value(&comparison)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListScreensArgs {
    #[serde(default)]
    pub include_findings: bool,
}

/// 列出已登记屏幕
pub struct ListScreensTool {
    session: Arc<InspectionSession>,
}

impl ListScreensTool {
    pub fn new(session: Arc<InspectionSession>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Tool for ListScreensTool {
    fn name(&self) -> &str {
        "list_screens"
    }

    fn description(&self) -> &str {
        "List registered screens with total and reviewed counts."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<ListScreensArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, InspectorError> {
        let args: ListScreensArgs = parse_args(args)?;
        to_value(&self.session.registry().list(args.include_findings).await)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ClearSessionArgs {
    /// 归档快照的路径；为空且 archive 为 true 时使用会话默认归档位置
    #[serde(default)]
    pub archive_to: Option<PathBuf>,
    #[serde(default)]
    pub archive: bool,
}

/// 清空登记表，开始新的巡检
pub struct ClearSessionTool {
    session: Arc<InspectionSession>,
}

impl ClearSessionTool {
    pub fn new(session: Arc<InspectionSession>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Tool for ClearSessionTool {
    fn name(&self) -> &str {
        "clear_session"
    }

    fn description(&self) -> &str {
        "Discard all registered screens, optionally archiving a snapshot first."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<ClearSessionArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, InspectorError> {
        let args: ClearSessionArgs = parse_args(args)?;
        let archive_to = match args.archive_to {
            Some(path) => Some(path),
            None if args.archive => Some(self.session.default_archive_path()),
            None => None,
        };
        let outcome = self.session.registry().clear(archive_to.as_deref()).await?;
        to_value(&outcome)
    }
}

/// 汇总报告数据
pub struct InspectionReportTool {
    session: Arc<InspectionSession>,
}

impl InspectionReportTool {
    pub fn new(session: Arc<InspectionSession>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Tool for InspectionReportTool {
    fn name(&self) -> &str {
        "inspection_report"
    }

    fn description(&self) -> &str {
        "Summarize the session: finding counts by severity and category, coverage and score."
    }

    async fn execute(&self, _args: Value) -> Result<Value, InspectorError> {
        to_value(&self.session.report().await)
    }
}
