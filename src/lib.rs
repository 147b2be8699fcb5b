//! Mirror GitHub artefacts (issues, pull requests, discussions, milestones,
//! workflow runs) into Notion databases via an idempotent upsert keyed on a
//! stable GitHub identifier.

pub mod config;
pub mod error;
pub mod github;
pub mod mapper;
pub mod model;
pub mod notion;
pub mod report;
pub mod retry;
pub mod sync;
