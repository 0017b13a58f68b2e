//! Work item operations against a named Azure DevOps connection.
//!
//! `WorkItemService` ties the pieces together: connection and type metadata
//! come from the `ConfigStore` through the `CacheLayer`, credentials from the
//! `AuthResolver`, wire bodies from the patch codec, and the actual HTTP call
//! from a `Transport`. Work item data itself is never cached.

use std::convert::Infallible;
use std::sync::Arc;

use serde_json::Map;
use tracing::{debug, info, instrument, warn};

use crate::api::auth::AuthResolver;
use crate::api::client::{Endpoints, HttpRequest, HttpResponse, Transport};
use crate::api::patch::{
    apply_type_defaults, build_patch, parse_result, parse_wiql, parse_work_item_batch,
    remote_error_message, strip_terminal_state, FieldSet,
};
use crate::api::types::{fields, AzureResult, WiqlRequest, WorkItem};
use crate::cache::{CacheLayer, CONFIG_TTL};
use crate::config::{
    find_connection, find_work_item_type, ConfigError, ConfigStore, ConnectionConfig,
    PriorityDef, SelectOption, StateDef, WorkItemTypeDef,
};
use crate::error::{Result, ServiceError};

/// Result count used when a query does not name one.
pub const DEFAULT_MAX_RESULTS: u32 = 50;

/// Largest batch the work items endpoint accepts.
pub const MAX_RESULTS_LIMIT: u32 = 200;

const CONNECTIONS_KEY: &str = "config.connections";
const WORK_ITEM_TYPES_KEY: &str = "config.work_item_types";
const PRIORITIES_KEY: &str = "config.priorities";

/// Capability check gating writes.
///
/// The service never calls this itself; hosts with a permission model call
/// [`ensure_can_edit`] before invoking a write.
pub trait EditPermission {
    /// Whether the current caller may create, update, or delete work items.
    fn has_edit_permission(&self) -> bool;
}

/// A fixed permission answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticPermission(pub bool);

impl StaticPermission {
    /// Permission granted.
    pub fn allow() -> Self {
        Self(true)
    }

    /// Permission refused.
    pub fn deny() -> Self {
        Self(false)
    }
}

impl EditPermission for StaticPermission {
    fn has_edit_permission(&self) -> bool {
        self.0
    }
}

/// Fail with a validation error unless `permission` allows edits.
pub fn ensure_can_edit(permission: &dyn EditPermission) -> Result<()> {
    if permission.has_edit_permission() {
        Ok(())
    } else {
        Err(ServiceError::validation("you do not have permission to edit work items"))
    }
}

/// Optional filters for [`WorkItemService::get_work_items`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkItemQuery {
    /// Keep only items of this type (case-insensitive).
    pub work_item_type: Option<String>,
    /// Keep only items in this state (case-insensitive).
    pub state: Option<String>,
    /// Upper bound on the remote query size. Defaults to 50.
    pub max_results: Option<u32>,
}

impl WorkItemQuery {
    /// A query with no filters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by type.
    pub fn with_type(mut self, work_item_type: impl Into<String>) -> Self {
        self.work_item_type = Some(work_item_type.into());
        self
    }

    /// Filter by state.
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Bound the remote query size.
    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = Some(max_results);
        self
    }

    /// The effective remote query size.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Validation` when `max_results` is zero.
    pub fn top(&self) -> Result<u32> {
        match self.max_results {
            None => Ok(DEFAULT_MAX_RESULTS),
            Some(0) => Err(ServiceError::validation("max results must be a positive integer")),
            Some(n) if n > MAX_RESULTS_LIMIT => {
                debug!(requested = n, limit = MAX_RESULTS_LIMIT, "Capping max results");
                Ok(MAX_RESULTS_LIMIT)
            }
            Some(n) => Ok(n),
        }
    }

    fn matches(&self, item: &WorkItem) -> bool {
        let type_ok = self.work_item_type.as_deref().map_or(true, |wanted| {
            item.work_item_type()
                .is_some_and(|t| t.eq_ignore_ascii_case(wanted.trim()))
        });
        let state_ok = self.state.as_deref().map_or(true, |wanted| {
            item.state()
                .is_some_and(|s| s.eq_ignore_ascii_case(wanted.trim()))
        });
        type_ok && state_ok
    }
}

/// The integration service.
///
/// Type and priority metadata go through the shared `CacheLayer`. Connections
/// carry secret tokens, so they are memoised in process memory only and never
/// reach a disk backend.
///
/// Configuration reads are synchronous: a cache miss reads and parses the
/// source on the calling task while holding that key's lock. That is cheap
/// for a local TOML file; hosts with a slow `ConfigSource` should warm the
/// cache from `tokio::task::spawn_blocking`.
pub struct WorkItemService {
    config: ConfigStore,
    cache: CacheLayer,
    connection_cache: CacheLayer,
    auth: AuthResolver,
    transport: Arc<dyn Transport>,
}

impl WorkItemService {
    /// Create a service from its collaborators.
    pub fn new(
        config: ConfigStore,
        cache: CacheLayer,
        auth: AuthResolver,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            config,
            cache,
            connection_cache: CacheLayer::in_memory(),
            auth,
            transport,
        }
    }

    /// The underlying configuration store.
    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    // Cached configuration reads

    fn connections(&self) -> Result<Vec<ConnectionConfig>> {
        let connections = self
            .connection_cache
            .get_or_compute(CONNECTIONS_KEY, CONFIG_TTL, || self.config.get_connections())?;
        Ok(connections)
    }

    fn connection(&self, name: &str) -> Result<ConnectionConfig> {
        find_connection(self.connections()?, name)
            .ok_or_else(|| ConfigError::ConnectionNotFound(name.to_string()).into())
    }

    fn types(&self) -> Result<Vec<WorkItemTypeDef>> {
        let types = self.cache.get_or_compute(WORK_ITEM_TYPES_KEY, CONFIG_TTL, || {
            self.config.get_work_item_types()
        })?;
        Ok(types)
    }

    fn work_item_type(&self, name: &str) -> Result<WorkItemTypeDef> {
        find_work_item_type(self.types()?, name).ok_or_else(|| {
            ServiceError::validation(format!("'{}' is not a declared work item type", name))
        })
    }

    fn priority_defs(&self) -> Vec<PriorityDef> {
        let cached = self.cache.get_or_compute(PRIORITIES_KEY, CONFIG_TTL, || {
            Ok::<_, Infallible>(self.config.get_priorities())
        });
        match cached {
            Ok(levels) => levels,
            Err(never) => match never {},
        }
    }

    // Metadata accessors

    /// Declared connections as `{label, value}` options.
    pub fn available_configurations(&self) -> Result<Vec<SelectOption>> {
        Ok(self
            .connections()?
            .iter()
            .map(|c| {
                SelectOption::new(
                    format!("{} ({}/{})", c.name, c.organization, c.project),
                    c.name.clone(),
                )
            })
            .collect())
    }

    /// Declared work item types as options.
    pub fn work_item_types(&self) -> Result<Vec<SelectOption>> {
        Ok(self
            .types()?
            .iter()
            .map(|t| SelectOption::new(t.name.clone(), t.name.clone()))
            .collect())
    }

    /// Every state of a type, in declaration order.
    pub fn available_states_for_type(&self, work_item_type: &str) -> Result<Vec<SelectOption>> {
        let def = self.work_item_type(work_item_type)?;
        Ok(state_options(def.states.iter()))
    }

    /// The states a new item of this type may start in.
    pub fn creation_states_for_type(&self, work_item_type: &str) -> Result<Vec<SelectOption>> {
        let def = self.work_item_type(work_item_type)?;
        Ok(state_options(def.states.iter().filter(|s| !s.terminal)))
    }

    /// Priority levels, most urgent first. Never empty.
    pub fn priorities(&self) -> Vec<SelectOption> {
        self.priority_defs()
            .iter()
            .map(|p| SelectOption::new(p.label.clone(), p.level.to_string()))
            .collect()
    }

    /// Drop every cached configuration lookup.
    pub fn refresh_configuration(&self) {
        self.connection_cache.invalidate(CONNECTIONS_KEY);
        for key in [WORK_ITEM_TYPES_KEY, PRIORITIES_KEY] {
            self.cache.invalidate(key);
        }
        info!("Configuration cache refreshed");
    }

    // Work item verbs

    /// Create a work item of `work_item_type`.
    ///
    /// A state field naming a terminal state is removed before sending and
    /// the type's default fields are added where the caller left them out.
    ///
    /// # Errors
    ///
    /// - `Configuration` when the connection is unknown or has no credential
    /// - `Validation` for an undeclared type, a blank title, or bad fields
    /// - `Authentication`, `Transport`, `TransportTimeout` from the call
    ///
    /// A non-2xx answer is returned as a failed `AzureResult`.
    #[instrument(skip(self, fields), fields(connection = %connection_name))]
    pub async fn create_work_item(
        &self,
        connection_name: &str,
        work_item_type: &str,
        fields: FieldSet,
    ) -> Result<AzureResult> {
        let connection = self.connection(connection_name)?;
        let chain = self.auth.authenticate(&connection)?;
        let type_def = self.work_item_type(work_item_type)?;

        let mut fields = fields;
        require_title(&fields)?;
        strip_terminal_state(&mut fields, &type_def);
        apply_type_defaults(&mut fields, &type_def);
        let operations = build_patch(&fields)?;

        let request = HttpRequest::post(Endpoints::new(&connection).create(&type_def.name))
            .with_json_patch(&operations)?;
        debug!(operations = operations.len(), "Sending create request");

        let outcome = chain.send(self.transport.as_ref(), &request).await?;
        let result = parse_result(outcome.response.status, &outcome.response.body);
        log_outcome("create", &result);
        Ok(result)
    }

    /// Update fields of an existing work item.
    ///
    /// Terminal states are allowed here.
    #[instrument(skip(self, fields), fields(connection = %connection_name))]
    pub async fn update_work_item(
        &self,
        connection_name: &str,
        id: i64,
        fields: FieldSet,
    ) -> Result<AzureResult> {
        validate_id(id)?;
        if fields.is_empty() {
            return Err(ServiceError::validation("no fields to update"));
        }

        let connection = self.connection(connection_name)?;
        let chain = self.auth.authenticate(&connection)?;
        let operations = build_patch(&fields)?;

        let request =
            HttpRequest::patch(Endpoints::new(&connection).item(id)).with_json_patch(&operations)?;
        debug!(operations = operations.len(), "Sending update request");

        let outcome = chain.send(self.transport.as_ref(), &request).await?;
        let result = parse_result(outcome.response.status, &outcome.response.body);
        log_outcome("update", &result);
        Ok(result)
    }

    /// Delete a work item (moves it to the recycle bin).
    ///
    /// The REST API has no field for a deletion reason, so `reason` is only
    /// written to the audit log.
    #[instrument(skip(self, reason), fields(connection = %connection_name))]
    pub async fn delete_work_item(
        &self,
        connection_name: &str,
        id: i64,
        reason: Option<&str>,
    ) -> Result<AzureResult> {
        validate_id(id)?;

        let connection = self.connection(connection_name)?;
        let chain = self.auth.authenticate(&connection)?;

        let request = HttpRequest::delete(Endpoints::new(&connection).item(id));
        let outcome = chain.send(self.transport.as_ref(), &request).await?;
        let result = parse_delete_result(id, &outcome.response);

        if result.success {
            info!(
                target: "workbridge::audit",
                id,
                connection = %connection.name,
                reason = reason.unwrap_or(""),
                "Work item deleted"
            );
        }
        log_outcome("delete", &result);
        Ok(result)
    }

    /// Most recently changed work items of the connection's project.
    ///
    /// The query size is bounded by `max_results`; the type and state
    /// filters are applied to what the query returned.
    ///
    /// Unlike the write verbs this takes two round trips: a WIQL query that
    /// only returns ids, then one batch fetch for their fields. The batch
    /// fetch is skipped when the query matched nothing and reuses the
    /// strategy that authenticated the query.
    #[instrument(skip(self), fields(connection = %connection_name))]
    pub async fn get_work_items(
        &self,
        connection_name: &str,
        query: &WorkItemQuery,
    ) -> Result<Vec<WorkItem>> {
        let top = query.top()?;

        let connection = self.connection(connection_name)?;
        let chain = self.auth.authenticate(&connection)?;
        let endpoints = Endpoints::new(&connection);

        let wiql = HttpRequest::post(endpoints.wiql(top))
            .with_json(&WiqlRequest::recent_in_project())?
            .idempotent();
        let outcome = chain.send(self.transport.as_ref(), &wiql).await?;
        let ids = parse_wiql(&expect_success(outcome.response)?.body)?;
        if ids.is_empty() {
            debug!("Query matched no work items");
            return Ok(Vec::new());
        }

        let batch = HttpRequest::get(endpoints.batch(&ids));
        let hydrated = chain
            .pinned_to(outcome.strategy)
            .send(self.transport.as_ref(), &batch)
            .await?;
        let items = parse_work_item_batch(&expect_success(hydrated.response)?.body)?;

        let fetched = items.len();
        let items: Vec<WorkItem> = items.into_iter().filter(|item| query.matches(item)).collect();
        debug!(fetched, returned = items.len(), "Fetched work items");
        Ok(items)
    }
}

fn state_options<'a>(states: impl Iterator<Item = &'a StateDef>) -> Vec<SelectOption> {
    states
        .map(|s| SelectOption::new(s.name.clone(), s.name.clone()))
        .collect()
}

fn validate_id(id: i64) -> Result<()> {
    if id <= 0 {
        return Err(ServiceError::validation(format!(
            "work item id must be positive, got {}",
            id
        )));
    }
    Ok(())
}

fn require_title(fields: &FieldSet) -> Result<()> {
    let present = fields
        .get(fields::TITLE)
        .and_then(|v| v.as_str())
        .is_some_and(|title| !title.trim().is_empty());
    if present {
        Ok(())
    } else {
        Err(ServiceError::validation(format!(
            "{} is required to create a work item",
            fields::TITLE
        )))
    }
}

/// Reads treat a non-2xx answer as an error; there is no result to hand back.
fn expect_success(response: HttpResponse) -> Result<HttpResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(ServiceError::RemoteRejected {
            status: response.status,
            message: remote_error_message(response.status, &response.body),
        })
    }
}

fn parse_delete_result(id: i64, response: &HttpResponse) -> AzureResult {
    if response.is_success() && response.body.trim().is_empty() {
        return AzureResult::succeeded(
            Some(id),
            Map::new(),
            response.status,
            format!("Work item {} deleted", id),
        );
    }

    let parsed = parse_result(response.status, &response.body);
    if parsed.success {
        AzureResult::succeeded(
            parsed.id,
            parsed.fields,
            parsed.status_code,
            format!("Work item {} deleted", id),
        )
    } else {
        parsed
    }
}

fn log_outcome(verb: &str, result: &AzureResult) {
    if result.success {
        info!(verb, id = ?result.id, status = result.status_code, "Work item {} succeeded", verb);
    } else {
        warn!(verb, status = result.status_code, "Work item {} failed: {}", verb, result.message);
    }
}
