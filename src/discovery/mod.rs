//! Connection discovery: candidate generation, the run loop and edge writes

pub mod candidates;
pub mod engine;
pub mod report;
pub mod writer;

pub use candidates::{
    Candidate, CandidateConfig, CandidateGenerator, CandidateSequence, EvaluationLog,
};
pub use engine::{DiscoveryConfig, DiscoveryEngine};
pub use report::{AcceptedEdge, Budget, DiscoveryReport, SkippedCandidate, StopReason};
pub use writer::{EdgeWriteError, EdgeWriter, UpsertOutcome, UpsertStatus};
