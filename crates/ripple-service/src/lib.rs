#![deny(unsafe_code)]
//! # ripple-service
//!
//! The embedding facade for the ripple change-intelligence core.
//!
//! A transport (HTTP handler, MCP bridge, batch worker) owns exactly one
//! [`ChangeIntelligence`] and calls its operations; everything returns a
//! value or a typed [`ripple_types::CoreError`]. The facade owns the event
//! store, the shared service graph, the analytical engines, and the
//! post-commit observer registry.
//!
//! Ingest ordering is fixed: persist, then attach the blast-radius
//! prediction when a graph is present, then notify observers. Observers
//! only ever see committed events.

pub mod config;
pub mod observer;
pub mod service;

pub use config::ServiceConfig;
pub use observer::ChangeObserver;
pub use service::{
    BlastRadiusRequest, ChangeIntelligence, CorrelateRequest, CorrelationReport, DependencyView,
    Health, IngestOutcome, TriageReport, TriageRequest, VelocityReport,
};
