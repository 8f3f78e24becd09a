//! 巡检汇总：把登记表的 list 输出与约束摘要折叠成带评分的结构化数据（不负责排版成文字）

use std::collections::BTreeMap;

use serde::Serialize;

use crate::inspector::constraints::DesignSystemSummary;
use crate::inspector::finding::{FindingCategory, Severity};
use crate::inspector::registry::{ScreenId, ScreenListing};

const CRITICAL_PENALTY: u32 = 15;
const WARNING_PENALTY: u32 = 5;
const INFO_PENALTY: u32 = 1;

/// 单屏汇总
#[derive(Debug, Clone, Serialize)]
pub struct ScreenScore {
    pub id: ScreenId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub finding_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worst_severity: Option<Severity>,
}

/// 整个会话的汇总
#[derive(Debug, Clone, Serialize)]
pub struct InspectionReport {
    pub total_screens: usize,
    pub reviewed_screens: usize,
    /// 已审阅比例，0.0 ~ 1.0；没有屏幕时为 0
    pub coverage: f64,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_category: BTreeMap<FindingCategory, usize>,
    /// 100 减去按严重程度加权的扣分，最低 0
    pub score: u32,
    pub screens: Vec<ScreenScore>,
    pub discovered_patterns: usize,
    pub design_system: DesignSystemSummary,
}

impl InspectionReport {
    /// listing 需要带 findings（`list(true)`），否则类别统计为空
    pub fn build(listing: &ScreenListing, design_system: DesignSystemSummary) -> Self {
        let mut by_severity: BTreeMap<Severity, usize> = BTreeMap::new();
        let mut by_category: BTreeMap<FindingCategory, usize> = BTreeMap::new();

        for screen in &listing.screens {
            for finding in screen.findings.iter().flatten() {
                *by_severity.entry(finding.severity).or_default() += 1;
                *by_category.entry(finding.category).or_default() += 1;
            }
        }

        let penalty: u32 = by_severity
            .iter()
            .map(|(sev, n)| {
                let weight = match sev {
                    Severity::Critical => CRITICAL_PENALTY,
                    Severity::Warning => WARNING_PENALTY,
                    Severity::Info => INFO_PENALTY,
                };
                weight.saturating_mul(*n as u32)
            })
            .fold(0u32, u32::saturating_add);

        let coverage = if listing.total == 0 {
            0.0
        } else {
            listing.reviewed as f64 / listing.total as f64
        };

        Self {
            total_screens: listing.total,
            reviewed_screens: listing.reviewed,
            coverage,
            by_severity,
            by_category,
            score: 100u32.saturating_sub(penalty),
            screens: listing
                .screens
                .iter()
                .map(|s| ScreenScore {
                    id: s.id,
                    label: s.label.clone(),
                    finding_count: s.finding_count,
                    worst_severity: s.worst_severity,
                })
                .collect(),
            discovered_patterns: design_system.patterns.len(),
            design_system,
        }
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.by_severity.get(&severity).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspector::constraints::default_document;
    use crate::inspector::finding::Finding;
    use crate::inspector::registry::ScreenSummary;

    fn screen(n: u64, findings: Vec<Finding>) -> ScreenSummary {
        ScreenSummary {
            id: ScreenId::new(n),
            label: None,
            captured_at: chrono::Utc::now(),
            navigation_path: vec![],
            screenshot_path: format!("/tmp/{}.png", n).into(),
            reviewed: !findings.is_empty(),
            finding_count: findings.len(),
            worst_severity: findings.iter().map(|f| f.severity).max(),
            findings: Some(findings),
        }
    }

    #[test]
    fn test_empty_session_scores_full() {
        let listing = ScreenListing {
            screens: vec![],
            total: 0,
            reviewed: 0,
        };
        let report = InspectionReport::build(&listing, DesignSystemSummary::from_document(&default_document()));
        assert_eq!(report.score, 100);
        assert_eq!(report.coverage, 0.0);
        assert_eq!(report.discovered_patterns, 0);
    }

    #[test]
    fn test_weighted_score_and_counts() {
        let f = |c, s| Finding::new(c, s, "subject", "message");
        let listing = ScreenListing {
            screens: vec![
                screen(
                    1,
                    vec![
                        f(FindingCategory::Accessibility, Severity::Critical),
                        f(FindingCategory::Consistency, Severity::Warning),
                    ],
                ),
                screen(2, vec![f(FindingCategory::Accessibility, Severity::Info)]),
                screen(3, vec![]),
            ],
            total: 3,
            reviewed: 2,
        };
        let report = InspectionReport::build(&listing, DesignSystemSummary::from_document(&default_document()));
        assert_eq!(report.score, 100 - 15 - 5 - 1);
        assert_eq!(report.count(Severity::Critical), 1);
        assert_eq!(report.by_category[&FindingCategory::Accessibility], 2);
        assert!((report.coverage - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.screens[0].worst_severity, Some(Severity::Critical));
        assert_eq!(report.screens[2].worst_severity, None);
    }

    #[test]
    fn test_score_floors_at_zero() {
        let findings = (0..10)
            .map(|_| Finding::new(FindingCategory::Usability, Severity::Critical, "s", "m"))
            .collect();
        let listing = ScreenListing {
            screens: vec![screen(1, findings)],
            total: 1,
            reviewed: 1,
        };
        let report = InspectionReport::build(&listing, DesignSystemSummary::from_document(&default_document()));
        assert_eq!(report.score, 0);
    }
}
