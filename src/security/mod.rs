pub mod analyzer;
pub mod path;
pub mod rate_limit;
pub mod replay;

pub use analyzer::{
    AnalysisRequest, SecurityAnalyzer, SecurityReport, SecurityThreat, ThreatLevel, ThreatType,
};
pub use replay::{ReplayDetector, ReplayOutcome};
