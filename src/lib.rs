//! Governed Trading Core
//!
//! Governance control plane for an autonomous financial agent:
//! - Policy gate against an external decision authority
//! - Layered plan auditor (policy, STPA, symbolic, drift)
//! - Safety interceptor and optimistic execution on the hot path
//! - Hybrid inference router with TTFT fallback
//! - Tiered telemetry sampling with heavy-attribute stripping
//! - Per-session intent workflow gate
//!
//! HOT PATH:  PLAN → SAFETY CHECK ∥ PREPARATION → EXECUTE | REPLAN
//! DEEP PATH: PLAN → PARSE → POLICY → STPA → SYMBOLIC → DRIFT → VERDICT

pub mod api;
pub mod audit;
pub mod config;
pub mod error;
pub mod execution;
pub mod inference;
pub mod models;
pub mod policy;
pub mod safety;
pub mod state;
pub mod telemetry;
pub mod workflow;

pub use error::{GovernanceError, Result};

// Re-export common types
pub use models::*;
pub use audit::{AuditStatus, AuditVerdict, PlanAuditor};
pub use safety::{SafetyInterceptor, SafetyStatus};
