//! Domain models for polyred sessions.
//!
//! # Core Concepts
//!
//! - [`Session`]: An exploration context anchored to one uploaded reference model.
//!   Root sessions come from an upload; branches come from a copy.
//! - [`Phase`]: One simplification candidate computed by a run. Immutable once
//!   computed, except for its rating which is set exactly once.
//! - [`Configuration`]: Per-part target reduction ratios submitted before a run.
//! - [`RatingSubmission`]: An ordered batch of human quality scores.
//! - [`LineageEdge`]: A branching event, either a copy (new id) or a reset (same id).
//! - [`RatingEvent`]: An accepted rating, as consumed by the feedback aggregator.

mod feedback;
mod lineage;
mod phase;
mod rating;
mod reduction;
mod session;

pub use feedback::*;
pub use lineage::*;
pub use phase::*;
pub use rating::*;
pub use reduction::*;
pub use session::*;

/// Identifier of an uploaded reference model.
pub type ModelId = String;

/// Opaque, stable session identifier issued by the service.
pub type SessionId = String;

/// Phase identifier, unique within its owning session.
pub type PhaseId = String;
