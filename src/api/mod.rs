//! Azure DevOps API client and types.
//!
//! This module provides the interface for communicating with the Work Item
//! Tracking REST API: request transport, authentication strategies, and the
//! JSON Patch codec.

pub mod auth;
pub mod client;
pub mod patch;
pub mod types;

pub use auth::{
    AuthChain, AuthResolver, AuthStrategy, CredentialBroker, KeyringBroker, StrategyKind,
};
pub use client::{Endpoints, HttpRequest, HttpResponse, ReqwestTransport, Transport};
pub use patch::{build_patch, parse_result, FieldSet, PatchOp, PatchOperation};
pub use types::{fields, AzureResult, WorkItem};
