//! taskdesk: task board backend for a workplace collaboration study.
//!
//! Tenants, users, tasks with multiple assignees, dependency edges between
//! tasks, deadline sweeps, an onboarding pipeline, surveys and a research
//! activity log exported as CSV.

pub mod auth;
pub mod blob;
pub mod cli;
pub mod config;
pub mod db;
pub mod deadlines;
pub mod error;
pub mod events;
pub mod notify;
pub mod pipeline;
pub mod preferences;
pub mod research;
pub mod scheduler;
pub mod service;
pub mod types;
