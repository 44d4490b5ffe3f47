#![deny(unsafe_code)]
//! # ripple-types
//!
//! Domain model for the ripple change-intelligence core.
//!
//! Everything that crosses a crate boundary lives here: change events and
//! their enumerations, the service-graph node/edge types, analysis results
//! (blast radius, correlations, change sets), evidence links, and the shared
//! error taxonomy.
//!
//! ## Key Types
//!
//! - [`ChangeEvent`] — a single observed mutation to the environment
//! - [`ServiceNode`] / [`DependencyEdge`] — the dependency graph vocabulary
//! - [`ImpactPath`] — one traversal result with aggregated criticality
//! - [`BlastRadiusPrediction`] / [`ChangeCorrelation`] / [`ChangeSet`] —
//!   analytical outputs
//! - [`CoreError`] — the error taxonomy shared by every ripple crate

pub mod analysis;
pub mod deadline;
pub mod error;
pub mod event;
pub mod evidence;
pub mod graph;

pub use analysis::{
    BlastRadiusPrediction, ChangeCorrelation, ChangeSet, ConfidenceFactors, CorrelationConfidence,
    RankedChangeSet, ReadinessDelta, ReadinessState, RiskLevel,
};
pub use deadline::Deadline;
pub use error::{CoreError, CoreResult, ErrorKind};
pub use event::{
    AuthorType, ChangeEvent, ChangeEventPatch, ChangeSource, ChangeStatus, ChangeType, Initiator,
    NewChangeEvent, StoreStats, VelocityMetric,
};
pub use evidence::{EvidenceLink, EvidenceType};
pub use graph::{
    Criticality, DependencyEdge, DependencySpec, DependencyType, EdgeSource, GraphStats,
    ImpactPath, ServiceNode, ServiceTier, ServiceType,
};
