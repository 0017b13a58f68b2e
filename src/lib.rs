//! Workbridge - Azure DevOps Boards work item integration.
//!
//! Create, update, delete, and query work items against named connections,
//! authenticating with a managed credential and falling back to a personal
//! access token.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod service;

pub use api::{AzureResult, FieldSet, WorkItem};
pub use error::{FailureKind, Result, ServiceError};
pub use service::{
    ensure_can_edit, EditPermission, StaticPermission, WorkItemQuery, WorkItemService,
};
