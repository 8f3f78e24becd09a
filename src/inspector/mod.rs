//! 巡检状态服务：屏幕去重登记、发现、设计约束存储与汇总

pub mod capture;
pub mod constraints;
pub mod digest;
pub mod finding;
pub mod registry;
pub mod report;
pub mod store;

pub use capture::{CommandCapture, EngineCapture, ScreenCapture};
pub use constraints::{
    apply_update, default_document, ConstraintOperation, ConstraintStore, ConstraintUpdate,
    DesignSystemSummary,
};
pub use digest::{
    hamming_distance, strategy_for, structural_digest, ContentHashDigest, Digest, DigestStrategy,
    PerceptualDigest,
};
pub use finding::{Finding, FindingCategory, Severity};
pub use registry::{
    ClearOutcome, Comparison, NavigationContext, Registration, RegistryOptions, ScreenEntry,
    ScreenId, ScreenListing, ScreenRegistry, SimilarityBand, SimilarityBands,
};
pub use report::InspectionReport;
