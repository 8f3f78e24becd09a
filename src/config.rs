//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `INSPECTOR__*` 覆盖（双下划线表示嵌套，如 `INSPECTOR__ENGINE__COMMAND=maestro`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub inspector: InspectorSection,
    #[serde(default)]
    pub capture: CaptureSection,
    #[serde(default)]
    pub tools: ToolsSection,
}

/// [engine] 段：外部自动化引擎的启动方式与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// 显式指定的引擎可执行文件，优先级最高
    pub binary: Option<PathBuf>,
    /// 常见安装位置，按顺序探测；`~` 开头时展开为 HOME
    pub preferred_paths: Vec<String>,
    /// 以上都不存在时交给 PATH 解析的命令名
    pub command: String,
    pub args: Vec<String>,
    /// stderr 中出现该子串即视为引擎就绪
    pub ready_marker: String,
    /// 启动等待就绪的上限（秒），会话内固定
    pub startup_timeout_secs: u64,
    /// 单次 RPC 默认超时（毫秒）
    pub call_timeout_ms: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            binary: None,
            preferred_paths: vec!["~/.maestro/bin/maestro".into()],
            command: "maestro".into(),
            args: vec!["mcp".into()],
            ready_marker: "MCP server".into(),
            startup_timeout_secs: 10,
            call_timeout_ms: 30_000,
        }
    }
}

impl EngineSection {
    /// 解析最终要启动的程序：binary > 已安装路径 > 命令名
    pub fn resolve_program(&self) -> PathBuf {
        if let Some(binary) = &self.binary {
            return binary.clone();
        }
        self.preferred_paths
            .iter()
            .map(|p| expand_home(p))
            .find(|p| p.is_file())
            .unwrap_or_else(|| PathBuf::from(&self.command))
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => PathBuf::from(path),
        },
        None => PathBuf::from(path),
    }
}

/// 摘要策略：content 为字节级内容哈希（保守，不会误合并），perceptual 为感知哈希
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DigestKind {
    #[default]
    Content,
    Perceptual,
}

/// [inspector] 段：状态目录、去重阈值与相似度分档
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InspectorSection {
    /// 会话状态目录，未设置时用 <tmp>/maestro-inspector
    pub state_dir: Option<PathBuf>,
    pub duplicate_threshold: u32,
    pub digest: DigestKind,
    /// 距离 < identical_below 视为相同
    pub identical_below: u32,
    /// 距离 < similar_below 视为相似，其余为不同
    pub similar_below: u32,
    /// 每次登记后是否写出 screens.json 索引
    pub persist_index: bool,
}

impl Default for InspectorSection {
    fn default() -> Self {
        Self {
            state_dir: None,
            duplicate_threshold: 5,
            digest: DigestKind::Content,
            identical_below: 5,
            similar_below: 15,
            persist_index: true,
        }
    }
}

impl InspectorSection {
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("maestro-inspector"))
    }
}

/// 截图 / 元素树的来源
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// 直接设备通道：两者都走外部命令
    #[default]
    Command,
    /// 元素树经引擎工具获取，截图仍走外部命令
    Engine,
}

/// [capture] 段：截图与元素树采集命令
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureSection {
    pub mode: CaptureMode,
    /// 参数中的 {{output}} 会替换为截图输出路径；没有占位符时把 stdout 写入该路径
    pub screenshot_command: Vec<String>,
    pub hierarchy_command: Vec<String>,
    /// engine 模式下用于获取元素树的工具名
    pub hierarchy_tool: String,
    pub timeout_secs: u64,
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            mode: CaptureMode::Command,
            screenshot_command: vec![
                "adb".into(),
                "exec-out".into(),
                "screencap".into(),
                "-p".into(),
            ],
            hierarchy_command: vec!["maestro".into(), "hierarchy".into()],
            hierarchy_tool: "inspect_view_hierarchy".into(),
            timeout_secs: 30,
        }
    }
}

/// [tools] 段：工具调用的外层超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 120,
        }
    }
}

/// 从 config 目录加载配置，环境变量 INSPECTOR__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 INSPECTOR__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("INSPECTOR")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
