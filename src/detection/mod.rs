//! Boundary-violation and RSD trigger detection.
//!
//! ```text
//! message ──► TriggerMatcher ───────────────┐
//!        └──► BoundaryRuleEngine ─► empty? ─┴─► FallbackDetector (model)
//!                                                      │
//!                                  DetectionReport ◄───┘
//!                                        │
//!                                  record() ─► violations, pattern upsert
//! ```

pub mod detector;
pub mod fallback;
pub mod rules;
pub mod triggers;
pub mod types;

pub use detector::{
    BoundaryDetector, DetectionReport, DetectionRequest, DetectorConfig, PersistenceReport,
};
pub use fallback::{FallbackDetector, FallbackOutcome};
pub use rules::{BoundaryRuleEngine, WorkHours, detect_repeated_pushing};
pub use triggers::{ToneIndicatorPolicy, TriggerMatcher};
pub use types::{BoundaryViolation, Severity, Trigger, ViolationType};
