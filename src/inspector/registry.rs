//! 屏幕去重登记表
//!
//! 每次 capture_and_register 先截图、算相似度摘要，再在已有条目中找距离小于阈值的最近条目：
//! 找到则丢弃新截图并返回已有 id；否则采集元素树、算结构摘要，登记为新屏幕。
//! 查重与插入在同一把锁内完成，所以登记表中任意两个条目的距离都不小于阈值。
//!
//! 登记表由会话显式持有，会话结束时 clear（可先归档快照）。

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::InspectorSection;
use crate::core::InspectorError;
use crate::inspector::capture::ScreenCapture;
use crate::inspector::digest::{structural_digest, Digest, DigestStrategy};
use crate::inspector::finding::{Finding, Severity};
use crate::inspector::store;

/// 屏幕 id，显示为 `screen_001`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScreenId(u64);

impl ScreenId {
    pub fn new(n: u64) -> Self {
        Self(n)
    }

    pub fn number(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScreenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "screen_{:03}", self.0)
    }
}

impl FromStr for ScreenId {
    type Err = InspectorError;

    /// 接受 `screen_001` 或纯数字
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let digits = s.strip_prefix("screen_").unwrap_or(s);
        digits
            .parse::<u64>()
            .ok()
            .filter(|n| *n > 0)
            .map(ScreenId)
            .ok_or_else(|| InspectorError::InvalidArguments(format!("invalid screen id: {}", s)))
    }
}

impl TryFrom<String> for ScreenId {
    type Error = InspectorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ScreenId> for String {
    fn from(id: ScreenId) -> Self {
        id.to_string()
    }
}

/// 到达当前屏幕的导航上下文
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NavigationContext {
    /// 调用方给屏幕起的名字，如 "Login"
    #[serde(default)]
    pub label: Option<String>,
    /// 从会话开始到这里的动作序列
    #[serde(default)]
    pub path: Vec<String>,
}

/// 一个不同的屏幕
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenEntry {
    pub id: ScreenId,
    #[serde(default)]
    pub label: Option<String>,
    pub similarity_digest: Digest,
    pub structural_digest: String,
    pub screenshot_path: PathBuf,
    pub captured_at: DateTime<Utc>,
    pub navigation_path: Vec<String>,
    pub reviewed: bool,
    pub findings: Vec<Finding>,
}

impl ScreenEntry {
    pub fn worst_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }
}

/// capture_and_register 的结果
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub id: ScreenId,
    pub is_new: bool,
    /// 命中已有条目时的距离
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<u32>,
    pub screenshot_path: PathBuf,
}

/// 距离分档
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityBand {
    Identical,
    Similar,
    Different,
}

/// 分档边界：`[0, identical_below)` 相同，`[identical_below, similar_below)` 相似，其余不同
#[derive(Debug, Clone, Copy)]
pub struct SimilarityBands {
    identical_below: u32,
    similar_below: u32,
}

impl SimilarityBands {
    pub fn new(identical_below: u32, similar_below: u32) -> Self {
        Self {
            identical_below,
            similar_below: similar_below.max(identical_below),
        }
    }

    pub fn classify(&self, distance: u32) -> SimilarityBand {
        if distance < self.identical_below {
            SimilarityBand::Identical
        } else if distance < self.similar_below {
            SimilarityBand::Similar
        } else {
            SimilarityBand::Different
        }
    }
}

impl Default for SimilarityBands {
    fn default() -> Self {
        Self::new(5, 15)
    }
}

/// compare 的结果
#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    pub a: ScreenId,
    pub b: ScreenId,
    pub distance: u32,
    pub structural_match: bool,
    pub band: SimilarityBand,
}

/// list 中的单个屏幕
#[derive(Debug, Clone, Serialize)]
pub struct ScreenSummary {
    pub id: ScreenId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub captured_at: DateTime<Utc>,
    pub navigation_path: Vec<String>,
    pub screenshot_path: PathBuf,
    pub reviewed: bool,
    pub finding_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worst_severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub findings: Option<Vec<Finding>>,
}

/// list 的结果
#[derive(Debug, Clone, Serialize)]
pub struct ScreenListing {
    pub screens: Vec<ScreenSummary>,
    pub total: usize,
    pub reviewed: usize,
}

/// clear 归档时写出的快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub session_id: String,
    pub archived_at: DateTime<Utc>,
    pub entries: Vec<ScreenEntry>,
}

/// clear 的结果
#[derive(Debug, Clone, Serialize)]
pub struct ClearOutcome {
    pub cleared: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_to: Option<PathBuf>,
}

/// 登记表参数
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub duplicate_threshold: u32,
    pub bands: SimilarityBands,
    /// 每次变更后写出的索引文件
    pub index_path: Option<PathBuf>,
}

impl RegistryOptions {
    pub fn from_config(inspector: &InspectorSection) -> Self {
        Self {
            duplicate_threshold: inspector.duplicate_threshold,
            bands: SimilarityBands::new(inspector.identical_below, inspector.similar_below),
            index_path: inspector
                .persist_index
                .then(|| inspector.state_dir().join("screens.json")),
        }
    }
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            duplicate_threshold: 5,
            bands: SimilarityBands::default(),
            index_path: None,
        }
    }
}

struct RegistryState {
    entries: Vec<ScreenEntry>,
    next_id: u64,
}

/// 屏幕登记表
pub struct ScreenRegistry {
    session_id: String,
    state: Mutex<RegistryState>,
    strategy: Box<dyn DigestStrategy>,
    capture: Arc<dyn ScreenCapture>,
    options: RegistryOptions,
}

impl ScreenRegistry {
    pub fn new(
        session_id: impl Into<String>,
        strategy: Box<dyn DigestStrategy>,
        capture: Arc<dyn ScreenCapture>,
        options: RegistryOptions,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            state: Mutex::new(RegistryState {
                entries: Vec::new(),
                next_id: 1,
            }),
            strategy,
            capture,
            options,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn duplicate_threshold(&self) -> u32 {
        self.options.duplicate_threshold
    }

    /// 截图并登记；与已有屏幕重复时返回已有 id（is_new = false）
    pub async fn capture_and_register(&self, nav: NavigationContext) -> Result<Registration, InspectorError> {
        let mut state = self.state.lock().await;

        let artifact = self.capture.capture_screenshot().await?;
        let digest = match self.digest_artifact(&artifact).await {
            Ok(d) => d,
            Err(e) => {
                discard_artifact(&artifact).await;
                return Err(e);
            }
        };

        let nearest = state
            .entries
            .iter()
            .map(|e| (e, self.strategy.distance(&e.similarity_digest, &digest)))
            .filter(|(_, d)| *d < self.options.duplicate_threshold)
            .min_by_key(|(_, d)| *d);
        if let Some((existing, distance)) = nearest {
            tracing::info!(id = %existing.id, distance, "screen already registered");
            let registration = Registration {
                id: existing.id,
                is_new: false,
                distance: Some(distance),
                screenshot_path: existing.screenshot_path.clone(),
            };
            discard_artifact(&artifact).await;
            return Ok(registration);
        }

        let hierarchy = match self.capture.capture_hierarchy().await {
            Ok(h) => h,
            Err(e) => {
                discard_artifact(&artifact).await;
                return Err(e);
            }
        };

        let id = ScreenId(state.next_id);
        state.next_id += 1;
        state.entries.push(ScreenEntry {
            id,
            label: nav.label,
            similarity_digest: digest,
            structural_digest: structural_digest(&hierarchy),
            screenshot_path: artifact.clone(),
            captured_at: Utc::now(),
            navigation_path: nav.path,
            reviewed: false,
            findings: Vec::new(),
        });
        tracing::info!(id = %id, strategy = self.strategy.name(), "registered new screen");
        self.persist_index(&state).await;

        Ok(Registration {
            id,
            is_new: true,
            distance: None,
            screenshot_path: artifact,
        })
    }

    async fn digest_artifact(&self, artifact: &Path) -> Result<Digest, InspectorError> {
        let bytes = tokio::fs::read(artifact).await.map_err(|e| {
            InspectorError::CaptureFailed(format!("read screenshot {}: {}", artifact.display(), e))
        })?;
        self.strategy.digest(&bytes)
    }

    /// 给屏幕追加一条发现并标记为已审阅，返回该屏幕的发现数
    pub async fn attach_finding(&self, id: ScreenId, finding: Finding) -> Result<usize, InspectorError> {
        let mut state = self.state.lock().await;
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| not_found(id))?;
        entry.findings.push(finding);
        entry.reviewed = true;
        let count = entry.findings.len();
        self.persist_index(&state).await;
        Ok(count)
    }

    /// 比较两个屏幕：摘要距离、结构摘要是否一致、距离分档
    pub async fn compare(&self, a: ScreenId, b: ScreenId) -> Result<Comparison, InspectorError> {
        let state = self.state.lock().await;
        let find = |id: ScreenId| state.entries.iter().find(|e| e.id == id).ok_or_else(|| not_found(id));
        let ea = find(a)?;
        let eb = find(b)?;
        let distance = self.strategy.distance(&ea.similarity_digest, &eb.similarity_digest);
        Ok(Comparison {
            a,
            b,
            distance,
            structural_match: ea.structural_digest == eb.structural_digest,
            band: self.options.bands.classify(distance),
        })
    }

    pub async fn get(&self, id: ScreenId) -> Option<ScreenEntry> {
        self.state.lock().await.entries.iter().find(|e| e.id == id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 所有屏幕及汇总计数，include_findings 为 true 时内联发现
    pub async fn list(&self, include_findings: bool) -> ScreenListing {
        let state = self.state.lock().await;
        let screens: Vec<ScreenSummary> = state
            .entries
            .iter()
            .map(|e| ScreenSummary {
                id: e.id,
                label: e.label.clone(),
                captured_at: e.captured_at,
                navigation_path: e.navigation_path.clone(),
                screenshot_path: e.screenshot_path.clone(),
                reviewed: e.reviewed,
                finding_count: e.findings.len(),
                worst_severity: e.worst_severity(),
                findings: include_findings.then(|| e.findings.clone()),
            })
            .collect();
        let reviewed = screens.iter().filter(|s| s.reviewed).count();
        ScreenListing {
            total: screens.len(),
            reviewed,
            screens,
        }
    }

    /// 结束会话：可先把快照归档到 archive_to，再清空条目并重置 id 计数
    pub async fn clear(&self, archive_to: Option<&Path>) -> Result<ClearOutcome, InspectorError> {
        let mut state = self.state.lock().await;
        if let Some(path) = archive_to {
            let snapshot = RegistrySnapshot {
                session_id: self.session_id.clone(),
                archived_at: Utc::now(),
                entries: state.entries.clone(),
            };
            store::write_json(path, &snapshot).await?;
            tracing::info!(path = %path.display(), entries = snapshot.entries.len(), "registry archived");
        }
        let cleared = state.entries.len();
        state.entries.clear();
        state.next_id = 1;
        self.persist_index(&state).await;
        tracing::info!(cleared, "registry cleared");
        Ok(ClearOutcome {
            cleared,
            archived_to: archive_to.map(Path::to_path_buf),
        })
    }

    /// 写出索引；失败只记日志，不影响内存中的登记结果
    async fn persist_index(&self, state: &RegistryState) {
        if let Some(path) = &self.options.index_path {
            if let Err(e) = store::write_json(path, &state.entries).await {
                tracing::warn!(error = %e, "failed to persist screen index");
            }
        }
    }
}

fn not_found(id: ScreenId) -> InspectorError {
    InspectorError::NotFound {
        kind: "screen",
        id: id.to_string(),
    }
}

async fn discard_artifact(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "could not discard screenshot");
    }
}
