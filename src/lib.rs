//! Client for the polyred mesh simplification service.
//!
//! A [`session::SessionController`] drives sessions through the
//! configure → run → inspect → evaluate cycle, branches them with copy and
//! reset, and feeds every accepted rating into a
//! [`feedback::FeedbackAggregator`]. The [`api`] module serves an in-process
//! stand-in for the remote service.

pub mod api;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod feedback;
pub mod lineage;
pub mod models;
pub mod session;

pub use client::PolyredClient;
pub use config::{ClientConfig, Credential};
pub use error::{Error, Result, TransportError};
pub use session::SessionController;
