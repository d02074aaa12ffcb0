//! Remote collaborators of a coaching session.
//!
//! This module provides:
//! - The session config provider (system instruction, model, API key)
//! - The post-session report analyzer
//!
//! Both sit behind async traits so sessions can run against fakes.

mod analysis;
mod http;
mod session_config;

pub use analysis::{parse_report, HttpReportAnalyzer, ReportAnalyzer};
pub use session_config::{
    parse_bundle, HttpSessionConfigProvider, SessionBundle, SessionConfigProvider,
    SessionConfigRequest,
};
