//! 巡检发现：挂在某个屏幕上的一条质量观察，创建后不可变

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::InspectorError;

/// 发现的类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    Consistency,
    Accessibility,
    /// 是否遵循设计系统
    SystemAdherence,
    Usability,
}

impl FindingCategory {
    pub const ALL: [FindingCategory; 4] = [
        FindingCategory::Consistency,
        FindingCategory::Accessibility,
        FindingCategory::SystemAdherence,
        FindingCategory::Usability,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FindingCategory::Consistency => "consistency",
            FindingCategory::Accessibility => "accessibility",
            FindingCategory::SystemAdherence => "system_adherence",
            FindingCategory::Usability => "usability",
        }
    }
}

impl FromStr for FindingCategory {
    type Err = InspectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| InspectorError::InvalidArguments(format!("unknown finding category: {}", s)))
    }
}

impl fmt::Display for FindingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 严重程度，按 Info < Warning < Critical 排序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl FromStr for Severity {
    type Err = InspectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(InspectorError::InvalidArguments(format!("unknown severity: {}", other))),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一条发现
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub category: FindingCategory,
    pub severity: Severity,
    /// 被观察的对象，如某个按钮或颜色
    pub subject: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Value>,
    pub recorded_at: DateTime<Utc>,
}

impl Finding {
    pub fn new(
        category: FindingCategory,
        severity: Severity,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            severity,
            subject: subject.into(),
            message: message.into(),
            details: BTreeMap::new(),
            recorded_at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}
