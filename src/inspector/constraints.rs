//! 设计约束存储
//!
//! 一个按点分路径寻址的嵌套 JSON 文档（design-system.json），记录巡检过程中发现的设计事实。
//! 文档用 `serde_json::Value`（object / array / 标量的带标签变体）表示，修改走显式的递归下降：
//! - set：中间段不存在时创建空对象，遇到已有的非对象值失败；末段无条件覆盖
//! - append：末段不存在时初始化为单元素数组，已是数组则追加，否则失败
//!
//! 保存是整文档覆盖写，读取是整文档读取；文件不存在时返回默认文档。

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;

use crate::config::InspectorSection;
use crate::core::InspectorError;
use crate::inspector::store;

/// 约束文件名，与上下文注入 hook 读取的文件一致
pub const CONSTRAINTS_FILE: &str = "design-system.json";

static SEGMENT_RE: OnceLock<Regex> = OnceLock::new();

fn segment_re() -> &'static Regex {
    SEGMENT_RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap())
}

/// 默认设计系统文档
pub fn default_document() -> Value {
    json!({
        "brand": {
            "colors": {},
            "typography": {},
            "spacing": {"unit": 8, "scale": [4, 8, 16, 24, 32, 48]}
        },
        "accessibility": {
            "min_contrast": 4.5,
            "min_touch_target": 44,
            "require_labels": true
        },
        "discovered_patterns": []
    })
}

/// 修改操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintOperation {
    Set,
    Append,
}

impl FromStr for ConstraintOperation {
    type Err = InspectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "set" => Ok(ConstraintOperation::Set),
            "append" => Ok(ConstraintOperation::Append),
            other => Err(InspectorError::InvalidOperation {
                operation: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ConstraintOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConstraintOperation::Set => "set",
            ConstraintOperation::Append => "append",
        })
    }
}

/// 一次修改的审计结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConstraintUpdate {
    pub path: String,
    pub operation: ConstraintOperation,
    pub previous_value: Option<Value>,
    pub new_value: Value,
    pub evidence: Option<String>,
}

/// 校验路径：非空、每段都是标识符形式
pub fn parse_path(path: &str) -> Result<Vec<&str>, InspectorError> {
    let invalid = || InspectorError::InvalidPath {
        path: path.to_string(),
    };
    if path.is_empty() {
        return Err(invalid());
    }
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().all(|s| segment_re().is_match(s)) {
        Ok(segments)
    } else {
        Err(invalid())
    }
}

/// 沿 parents 逐段下降，缺失的段创建为空对象
fn descend<'a>(
    node: &'a mut Map<String, Value>,
    parents: &[&str],
    path: &str,
) -> Result<&'a mut Map<String, Value>, InspectorError> {
    let Some((head, rest)) = parents.split_first() else {
        return Ok(node);
    };
    let child = node
        .entry(head.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    match child {
        Value::Object(map) => descend(map, rest, path),
        _ => Err(InspectorError::NotAnObject {
            path: path.to_string(),
            segment: head.to_string(),
        }),
    }
}

/// 在文档上执行一次修改，返回 (旧值, 新值)；失败时文档保持不变
pub fn apply_update(
    doc: &mut Value,
    path: &str,
    value: Value,
    operation: ConstraintOperation,
) -> Result<(Option<Value>, Value), InspectorError> {
    let segments = parse_path(path)?;
    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| InspectorError::InvalidPath { path: path.to_string() })?;
    let root = doc.as_object_mut().ok_or_else(|| InspectorError::NotAnObject {
        path: path.to_string(),
        segment: String::new(),
    })?;
    // 只有遇到已有的非对象值才会失败，而已有值之上的各段必然都已存在，所以失败前不会创建任何中间对象
    let target = descend(root, parents, path)?;

    match operation {
        ConstraintOperation::Set => {
            let previous = target.insert(last.to_string(), value.clone());
            Ok((previous, value))
        }
        ConstraintOperation::Append => match target.get_mut(*last) {
            None => {
                let new_value = Value::Array(vec![value]);
                target.insert(last.to_string(), new_value.clone());
                Ok((None, new_value))
            }
            Some(Value::Array(items)) => {
                let previous = Value::Array(items.clone());
                items.push(value);
                Ok((Some(previous), Value::Array(items.clone())))
            }
            Some(_) => Err(InspectorError::NotAnArray {
                path: path.to_string(),
            }),
        },
    }
}

/// 已发现模式的摘要
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternSummary {
    pub kind: String,
    pub screen_count: usize,
}

/// 设计系统的结构化摘要，供报告 / 上下文注入使用
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DesignSystemSummary {
    pub colors: BTreeMap<String, Value>,
    pub typography: BTreeMap<String, Value>,
    pub spacing_unit: Value,
    pub spacing_scale: Vec<Value>,
    pub min_contrast: f64,
    pub min_touch_target: f64,
    pub require_labels: bool,
    pub patterns: Vec<PatternSummary>,
}

impl DesignSystemSummary {
    pub fn from_document(doc: &Value) -> Self {
        let object_entries = |v: Option<&Value>| -> BTreeMap<String, Value> {
            v.and_then(Value::as_object)
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default()
        };
        let brand = &doc["brand"];
        let a11y = &doc["accessibility"];
        let spacing = &brand["spacing"];

        let patterns = doc["discovered_patterns"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|p| PatternSummary {
                        kind: p["type"].as_str().unwrap_or("unknown").to_string(),
                        screen_count: p["screens"].as_array().map(Vec::len).unwrap_or(0),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            colors: object_entries(brand.get("colors")),
            typography: object_entries(brand.get("typography")),
            spacing_unit: spacing.get("unit").cloned().unwrap_or(json!(8)),
            spacing_scale: spacing["scale"].as_array().cloned().unwrap_or_default(),
            min_contrast: a11y["min_contrast"].as_f64().unwrap_or(4.5),
            min_touch_target: a11y["min_touch_target"].as_f64().unwrap_or(44.0),
            require_labels: a11y["require_labels"].as_bool().unwrap_or(true),
            patterns,
        }
    }
}

/// 约束存储：同一时刻只有一个读-改-写序列
pub struct ConstraintStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ConstraintStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn from_config(inspector: &InspectorSection) -> Self {
        Self::new(inspector.state_dir().join(CONSTRAINTS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取文档；不存在或无法解析时返回默认文档
    pub async fn load(&self) -> Value {
        match store::read_json::<Value>(&self.path).await {
            Ok(Some(doc)) => doc,
            Ok(None) => default_document(),
            Err(e) => {
                tracing::warn!(error = %e, "constraint document unreadable, using defaults");
                default_document()
            }
        }
    }

    /// 整文档覆盖写
    pub async fn save(&self, doc: &Value) -> Result<(), InspectorError> {
        let _guard = self.write_lock.lock().await;
        store::write_json(&self.path, doc).await
    }

    /// 按路径修改并持久化；evidence 只原样回传，不做解释
    pub async fn update(
        &self,
        path: &str,
        value: Value,
        operation: &str,
        evidence: Option<String>,
    ) -> Result<ConstraintUpdate, InspectorError> {
        parse_path(path)?;
        let operation: ConstraintOperation = operation.parse()?;

        let _guard = self.write_lock.lock().await;
        let (mut doc, unreadable) = match store::read_json::<Value>(&self.path).await {
            Ok(Some(doc)) => (doc, false),
            Ok(None) => (default_document(), false),
            Err(e) => {
                tracing::warn!(error = %e, "constraint document unreadable, starting from defaults");
                (default_document(), true)
            }
        };
        let (previous_value, new_value) = apply_update(&mut doc, path, value, operation)?;
        if unreadable {
            self.set_aside_unreadable().await?;
        }
        store::write_json(&self.path, &doc).await?;
        tracing::info!(path, %operation, evidence = evidence.as_deref().unwrap_or("-"), "constraint updated");

        Ok(ConstraintUpdate {
            path: path.to_string(),
            operation,
            previous_value,
            new_value,
            evidence,
        })
    }

    /// 覆盖前把无法解析的旧文档改名为 `<name>.corrupt`，内容原样保留
    async fn set_aside_unreadable(&self) -> Result<(), InspectorError> {
        let aside = self.path.with_extension("json.corrupt");
        tokio::fs::rename(&self.path, &aside)
            .await
            .map_err(|e| InspectorError::storage(&self.path, e))?;
        tracing::warn!(moved_to = %aside.display(), "unreadable constraint document preserved");
        Ok(())
    }

    pub async fn summary(&self) -> DesignSystemSummary {
        DesignSystemSummary::from_document(&self.load().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> ConstraintStore {
        ConstraintStore::new(dir.path().join(CONSTRAINTS_FILE))
    }

    #[test]
    fn test_parse_path_validation() {
        assert_eq!(parse_path("brand.colors.primary").unwrap(), vec!["brand", "colors", "primary"]);
        assert!(parse_path("_private").is_ok());
        for bad in ["", ".", "brand.", ".brand", "brand..colors", "1st", "brand.colors-dark", "a b"] {
            assert!(
                matches!(parse_path(bad), Err(InspectorError::InvalidPath { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_set_creates_intermediates_and_returns_previous() {
        let mut doc = json!({});
        let (prev, new) = apply_update(&mut doc, "brand.colors.primary", json!("#1E88E5"), ConstraintOperation::Set).unwrap();
        assert_eq!(prev, None);
        assert_eq!(new, json!("#1E88E5"));
        assert_eq!(doc, json!({"brand": {"colors": {"primary": "#1E88E5"}}}));

        let (prev, _) = apply_update(&mut doc, "brand.colors.primary", json!("#1976D2"), ConstraintOperation::Set).unwrap();
        assert_eq!(prev, Some(json!("#1E88E5")));
    }

    #[test]
    fn test_set_through_scalar_fails_without_change() {
        let mut doc = json!({"brand": {"colors": "none"}});
        let before = doc.clone();
        let err = apply_update(&mut doc, "brand.colors.primary", json!("#fff"), ConstraintOperation::Set).unwrap_err();
        match err {
            InspectorError::NotAnObject { segment, .. } => assert_eq!(segment, "colors"),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(doc, before);

        let mut doc = json!({"spacing": [4, 8]});
        assert!(matches!(
            apply_update(&mut doc, "spacing.unit", json!(8), ConstraintOperation::Set),
            Err(InspectorError::NotAnObject { .. })
        ));
    }

    #[test]
    fn test_append_initializes_then_pushes() {
        let mut doc = json!({});
        let (prev, new) = apply_update(&mut doc, "discovered_patterns", json!({"type": "card"}), ConstraintOperation::Append).unwrap();
        assert_eq!(prev, None);
        assert_eq!(new, json!([{"type": "card"}]));
        let (prev, new) = apply_update(&mut doc, "discovered_patterns", json!({"type": "tab_bar"}), ConstraintOperation::Append).unwrap();
        assert_eq!(prev, Some(json!([{"type": "card"}])));
        assert_eq!(new, json!([{"type": "card"}, {"type": "tab_bar"}]));
    }

    #[test]
    fn test_append_to_non_array_fails() {
        let mut doc = json!({"brand": {"name": "Acme"}});
        assert!(matches!(
            apply_update(&mut doc, "brand.name", json!("x"), ConstraintOperation::Append),
            Err(InspectorError::NotAnArray { .. })
        ));
        assert_eq!(doc, json!({"brand": {"name": "Acme"}}));
    }

    #[tokio::test]
    async fn test_load_missing_returns_default() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.load().await, default_document());
    }

    #[tokio::test]
    async fn test_load_corrupt_returns_default() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        tokio::fs::write(store.path(), "{not json").await.unwrap();
        assert_eq!(store.load().await, default_document());
    }

    #[tokio::test]
    async fn test_update_preserves_corrupt_document() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        tokio::fs::write(store.path(), "{not json").await.unwrap();

        store.update("brand.colors.primary", json!("#0A84FF"), "set", None).await.unwrap();

        let aside = dir.path().join("design-system.json.corrupt");
        assert_eq!(tokio::fs::read_to_string(&aside).await.unwrap(), "{not json");
        let doc = store.load().await;
        assert_eq!(doc["brand"]["colors"]["primary"], "#0A84FF");
        assert_eq!(doc["accessibility"], default_document()["accessibility"]);
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let doc = json!({"brand": {"colors": {"primary": "#000"}}, "discovered_patterns": [{"type": "list", "screens": ["screen_001"]}], "n": 1.5});
        store.save(&doc).await.unwrap();
        assert_eq!(store.load().await, doc);
    }

    #[tokio::test]
    async fn test_update_reports_previous_and_new() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.save(&json!({})).await.unwrap();
        let first = store
            .update("brand.colors.primary", json!("#1E88E5"), "set", Some("screen_001".into()))
            .await
            .unwrap();
        assert_eq!(first.previous_value, None);
        let second = store
            .update("brand.colors.primary", json!("#1976D2"), "set", Some("screen_003".into()))
            .await
            .unwrap();
        assert_eq!(second.previous_value, Some(json!("#1E88E5")));
        assert_eq!(second.new_value, json!("#1976D2"));
        assert_eq!(second.evidence.as_deref(), Some("screen_003"));
        assert_eq!(store.load().await["brand"]["colors"]["primary"], "#1976D2");
    }

    #[tokio::test]
    async fn test_double_append_on_absent_path() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.update("brand.icons", json!("outline"), "append", None).await.unwrap();
        let second = store.update("brand.icons", json!("filled"), "append", None).await.unwrap();
        assert_eq!(second.new_value, json!(["outline", "filled"]));
        assert_eq!(store.load().await["brand"]["icons"], json!(["outline", "filled"]));
    }

    #[tokio::test]
    async fn test_invalid_operation_leaves_document_unchanged() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let before = store.load().await;
        for op in ["delete", "SET", "", "merge"] {
            let err = store.update("brand.colors.primary", json!("#fff"), op, None).await.unwrap_err();
            assert!(matches!(err, InspectorError::InvalidOperation { .. }));
        }
        assert_eq!(store.load().await, before);
        // 失败的修改不写文件
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_summary_reads_defaults_and_patterns() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let summary = store.summary().await;
        assert_eq!(summary.min_contrast, 4.5);
        assert_eq!(summary.spacing_unit, json!(8));
        assert_eq!(summary.spacing_scale.len(), 6);
        assert!(summary.patterns.is_empty());

        store
            .update(
                "discovered_patterns",
                json!({"type": "primary_button", "screens": ["screen_001", "screen_002"]}),
                "append",
                None,
            )
            .await
            .unwrap();
        let summary = store.summary().await;
        assert_eq!(
            summary.patterns,
            vec![PatternSummary {
                kind: "primary_button".into(),
                screen_count: 2
            }]
        );
    }
}
