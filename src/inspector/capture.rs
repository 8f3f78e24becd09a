//! 截图与元素树采集
//!
//! 登记表只依赖 [`ScreenCapture`] 接口：`capture_screenshot -> 截图文件路径`、
//! `capture_hierarchy -> 元素树描述文本`。具体走直接设备通道（外部命令）还是引擎工具由实现决定。

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::config::CaptureSection;
use crate::core::InspectorError;
use crate::engine::RpcClient;

/// 采集协作方
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    /// 截取当前屏幕，返回写好的截图文件路径
    async fn capture_screenshot(&self) -> Result<PathBuf, InspectorError>;

    /// 获取当前屏幕的元素树描述
    async fn capture_hierarchy(&self) -> Result<String, InspectorError>;
}

const OUTPUT_PLACEHOLDER: &str = "{{output}}";

/// 直接设备通道：以外部命令采集（无 shell，直接 exec program + args，带超时）
pub struct CommandCapture {
    screenshot_command: Vec<String>,
    hierarchy_command: Vec<String>,
    output_dir: PathBuf,
    timeout: Duration,
}

impl CommandCapture {
    pub fn new(
        screenshot_command: Vec<String>,
        hierarchy_command: Vec<String>,
        output_dir: impl AsRef<Path>,
        timeout: Duration,
    ) -> Self {
        Self {
            screenshot_command,
            hierarchy_command,
            output_dir: output_dir.as_ref().to_path_buf(),
            timeout,
        }
    }

    pub fn from_config(capture: &CaptureSection, output_dir: impl AsRef<Path>) -> Self {
        Self::new(
            capture.screenshot_command.clone(),
            capture.hierarchy_command.clone(),
            output_dir,
            Duration::from_secs(capture.timeout_secs),
        )
    }

    async fn run(&self, argv: &[String]) -> Result<Vec<u8>, InspectorError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| InspectorError::CaptureFailed("capture command is empty".into()))?;
        tracing::debug!(program = %program, ?args, "capture command");
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| InspectorError::CaptureFailed(format!("spawn {} failed: {}", program, e)))?;
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                InspectorError::CaptureFailed(format!(
                    "{} timed out after {}s",
                    program,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| InspectorError::CaptureFailed(format!("{} wait failed: {}", program, e)))?;
        if !output.status.success() {
            return Err(InspectorError::CaptureFailed(format!(
                "{} exit {:?}: {}",
                program,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }

    /// 把截图写到 path；命令带 {{output}} 占位符时由命令自己写，否则取其 stdout
    async fn write_screenshot(&self, path: &Path) -> Result<(), InspectorError> {
        let path_str = path.to_string_lossy().to_string();
        let writes_itself = self.screenshot_command.iter().any(|a| a.contains(OUTPUT_PLACEHOLDER));
        if writes_itself {
            let argv: Vec<String> = self
                .screenshot_command
                .iter()
                .map(|a| a.replace(OUTPUT_PLACEHOLDER, &path_str))
                .collect();
            self.run(&argv).await?;
        } else {
            let bytes = self.run(&self.screenshot_command).await?;
            if bytes.is_empty() {
                return Err(InspectorError::CaptureFailed("screenshot command produced no output".into()));
            }
            tokio::fs::write(path, bytes)
                .await
                .map_err(|e| InspectorError::CaptureFailed(format!("write screenshot: {}", e)))?;
        }

        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(InspectorError::CaptureFailed(format!(
                "screenshot was not written to {}",
                path.display()
            ))),
        }
    }
}

#[async_trait]
impl ScreenCapture for CommandCapture {
    async fn capture_screenshot(&self) -> Result<PathBuf, InspectorError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| InspectorError::CaptureFailed(format!("create capture dir: {}", e)))?;
        let path = self
            .output_dir
            .join(format!("capture_{}.png", uuid::Uuid::new_v4().simple()));

        match self.write_screenshot(&path).await {
            Ok(()) => Ok(path),
            Err(e) => {
                // 失败时不留半成品文件
                let _ = tokio::fs::remove_file(&path).await;
                Err(e)
            }
        }
    }

    async fn capture_hierarchy(&self) -> Result<String, InspectorError> {
        let bytes = self.run(&self.hierarchy_command).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// 元素树经引擎工具获取；截图仍交给直接设备通道（引擎的截图结果是图片内容而非文本）
pub struct EngineCapture {
    client: Arc<RpcClient>,
    hierarchy_tool: String,
    screenshots: CommandCapture,
}

impl EngineCapture {
    pub fn new(client: Arc<RpcClient>, hierarchy_tool: impl Into<String>, screenshots: CommandCapture) -> Self {
        Self {
            client,
            hierarchy_tool: hierarchy_tool.into(),
            screenshots,
        }
    }
}

#[async_trait]
impl ScreenCapture for EngineCapture {
    async fn capture_screenshot(&self) -> Result<PathBuf, InspectorError> {
        self.screenshots.capture_screenshot().await
    }

    async fn capture_hierarchy(&self) -> Result<String, InspectorError> {
        let value = self
            .client
            .call_tool(&self.hierarchy_tool, serde_json::json!({}))
            .await
            .map_err(|e| InspectorError::CaptureFailed(format!("{}: {}", self.hierarchy_tool, e)))?;
        Ok(match value {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }
}
