//! Notification-driven mail triage.
//!
//! Mailbox change notifications arrive on `/webhook`, pass the
//! [`gate::NotificationGate`] (handshake, client state, dedup), and each new
//! message runs through [`services::Pipeline`]: fetch, classify, create a To Do
//! task and file the message into its category folder.

pub mod app;
pub mod bootstrap;
pub mod classifier;
pub mod config;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod models;
pub mod provider;
pub mod services;

pub use app::{build_router, AppState};
pub use config::{AppConfig, TriageConfig};
