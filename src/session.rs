//! 巡检会话
//!
//! 一个会话显式持有登记表、约束存储与共享的引擎客户端；按会话创建，结束时 close，
//! 不同会话之间不共享任何状态。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, CaptureMode};
use crate::core::{EngineCleanup, InspectorError, SessionArchiveCleanup, ShutdownCoordinator};
use crate::engine::RpcClient;
use crate::inspector::{
    strategy_for, ClearOutcome, CommandCapture, ConstraintStore, EngineCapture, InspectionReport,
    RegistryOptions, ScreenCapture, ScreenRegistry,
};
use crate::tools::{
    AttachFindingTool, CaptureScreenTool, ClearSessionTool, CompareScreensTool, EngineTool,
    GetConstraintsTool, InspectionReportTool, ListScreensTool, ToolExecutor, ToolRegistry,
    UpdateConstraintTool,
};

pub struct InspectionSession {
    id: String,
    config: AppConfig,
    client: Arc<RpcClient>,
    registry: ScreenRegistry,
    constraints: ConstraintStore,
}

impl InspectionSession {
    /// 按配置组装会话：引擎客户端、采集方式、摘要策略、约束文件
    pub fn new(config: AppConfig) -> Self {
        let client = Arc::new(RpcClient::from_config(&config.engine));
        let state_dir = config.inspector.state_dir();
        let screenshots = CommandCapture::from_config(&config.capture, state_dir.join("captures"));
        let capture: Arc<dyn ScreenCapture> = match config.capture.mode {
            CaptureMode::Command => Arc::new(screenshots),
            CaptureMode::Engine => Arc::new(EngineCapture::new(
                client.clone(),
                config.capture.hierarchy_tool.clone(),
                screenshots,
            )),
        };
        Self::with_capture(config, client, capture)
    }

    /// 使用给定的采集方实现组装会话
    pub fn with_capture(config: AppConfig, client: Arc<RpcClient>, capture: Arc<dyn ScreenCapture>) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let registry = ScreenRegistry::new(
            id.clone(),
            strategy_for(config.inspector.digest),
            capture,
            RegistryOptions::from_config(&config.inspector),
        );
        let constraints = ConstraintStore::from_config(&config.inspector);
        tracing::info!(session = %id, state_dir = %config.inspector.state_dir().display(), "inspection session created");
        Self {
            id,
            config,
            client,
            registry,
            constraints,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn client(&self) -> &Arc<RpcClient> {
        &self.client
    }

    pub fn registry(&self) -> &ScreenRegistry {
        &self.registry
    }

    pub fn constraints(&self) -> &ConstraintStore {
        &self.constraints
    }

    /// 默认归档位置：<state_dir>/archive/<session id>.json
    pub fn default_archive_path(&self) -> PathBuf {
        self.config
            .inspector
            .state_dir()
            .join("archive")
            .join(format!("{}.json", self.id))
    }

    pub async fn report(&self) -> InspectionReport {
        let listing = self.registry.list(true).await;
        InspectionReport::build(&listing, self.constraints.summary().await)
    }

    /// 结束会话：停止引擎，按需归档后清空登记表
    pub async fn close(&self, archive: bool) -> Result<ClearOutcome, InspectorError> {
        self.client.stop().await;
        let archive_path = archive.then(|| self.default_archive_path());
        self.registry.clear(archive_path.as_deref()).await
    }

    /// 会话暴露给编排方的全部工具
    pub fn tool_registry(self: &Arc<Self>) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(CaptureScreenTool::new(self.clone()));
        registry.register(AttachFindingTool::new(self.clone()));
        registry.register(CompareScreensTool::new(self.clone()));
        registry.register(ListScreensTool::new(self.clone()));
        registry.register(ClearSessionTool::new(self.clone()));
        registry.register(InspectionReportTool::new(self.clone()));
        registry.register(UpdateConstraintTool::new(self.clone()));
        registry.register(GetConstraintsTool::new(self.clone()));
        registry.register(EngineTool::new(self.client.clone()));
        registry
    }

    pub fn executor(self: &Arc<Self>) -> ToolExecutor {
        ToolExecutor::new(self.tool_registry(), self.config.tools.tool_timeout_secs)
    }

    /// 退出时的清理序列：先归档登记表，再终止引擎
    pub fn shutdown_coordinator(self: &Arc<Self>) -> ShutdownCoordinator {
        let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(self.config.tools.tool_timeout_secs));
        coordinator.register(SessionArchiveCleanup::new(self.clone()));
        coordinator.register(EngineCleanup::new(self.client.clone()));
        coordinator
    }
}
