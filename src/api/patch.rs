//! JSON Patch encoding and response decoding.
//!
//! Writes to the Work Item Tracking API are `application/json-patch+json`
//! arrays of `{op, path, value}` objects applied in order. This module turns a
//! `FieldSet` into that array and turns raw responses back into `AzureResult`s
//! without ever failing on a malformed body.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use tracing::{debug, info};

use super::types::{fields, AzureResult, WiqlResponse, WorkItem, WorkItemBatch};
use crate::config::WorkItemTypeDef;
use crate::error::{FailureKind, Result, ServiceError};

/// Field reference name to value, in insertion order, keys unique.
///
/// Inserting an existing key replaces its value in place, so the last write
/// wins without moving the key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldSet {
    entries: Vec<(String, Value)>,
}

impl FieldSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a field, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Look up a field (case-sensitive).
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Remove a field, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    /// Whether the field is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no fields are set.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Parse a `Field.Name=value` assignment.
    ///
    /// The value is read as JSON when it parses, otherwise as a plain string.
    pub fn parse_assignment(input: &str) -> Result<(String, Value)> {
        let (key, raw) = input.split_once('=').ok_or_else(|| {
            ServiceError::validation(format!("expected 'Field.Name=value', got '{}'", input))
        })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(ServiceError::validation(format!(
                "missing field name in '{}'",
                input
            )));
        }

        let raw = raw.trim();
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        Ok((key.to_string(), value))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for FieldSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = FieldSet::new();
        for (k, v) in iter {
            set.insert(k, v);
        }
        set
    }
}

/// JSON Patch operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    /// Add or replace a field value.
    Add,
}

/// One step of a JSON Patch document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    /// The operation kind.
    pub op: PatchOp,
    /// Target path, e.g. `/fields/System.Title`.
    pub path: String,
    /// The value to write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl PatchOperation {
    /// An `add` of a field value.
    pub fn add_field(name: &str, value: Value) -> Self {
        Self {
            op: PatchOp::Add,
            path: format!("/fields/{}", name),
            value: Some(value),
        }
    }

    /// The field name targeted by a `/fields/...` path.
    pub fn field_name(&self) -> Option<&str> {
        self.path.strip_prefix("/fields/")
    }
}

/// Check a field name against the remote schema namespaces.
pub fn validate_field_name(name: &str) -> Result<()> {
    let known = fields::KNOWN_PREFIXES
        .iter()
        .any(|prefix| name.len() > prefix.len() && name.starts_with(prefix));
    if !known || name.contains(char::is_whitespace) || name.contains('/') {
        return Err(ServiceError::validation(format!(
            "'{}' is not a known field reference name (expected System.*, Microsoft.VSTS.* or Custom.*)",
            name
        )));
    }
    Ok(())
}

/// Coerce values of numeric fields to JSON numbers.
fn normalize_value(name: &str, value: &Value) -> Result<Value> {
    if !fields::NUMERIC.contains(&name) {
        return Ok(value.clone());
    }

    match value {
        Value::Number(_) | Value::Null => Ok(value.clone()),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(int) = s.parse::<i64>() {
                return Ok(Value::Number(int.into()));
            }
            s.parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| {
                    ServiceError::validation(format!(
                        "field '{}' expects a number, got '{}'",
                        name, s
                    ))
                })
        }
        other => Err(ServiceError::validation(format!(
            "field '{}' expects a number, got {}",
            name, other
        ))),
    }
}

/// Encode a field set as ordered `add` operations, one per key.
pub fn build_patch(field_set: &FieldSet) -> Result<Vec<PatchOperation>> {
    let mut operations: Vec<PatchOperation> = Vec::with_capacity(field_set.len());
    for (name, value) in field_set.iter() {
        validate_field_name(name)?;
        let value = normalize_value(name, value)?;
        let op = PatchOperation::add_field(name, value);
        match operations.iter_mut().find(|existing| existing.path == op.path) {
            Some(existing) => *existing = op,
            None => operations.push(op),
        }
    }
    Ok(operations)
}

/// Remove the state field when it names a terminal state of `type_def`.
///
/// Returns the removed value.
pub fn strip_terminal_state(field_set: &mut FieldSet, type_def: &WorkItemTypeDef) -> Option<Value> {
    let terminal = field_set
        .get(fields::STATE)
        .and_then(Value::as_str)
        .is_some_and(|state| type_def.is_terminal(state));

    if !terminal {
        return None;
    }

    let removed = field_set.remove(fields::STATE);
    info!(
        work_item_type = %type_def.name,
        state = ?removed,
        "Stripped terminal state from creation request"
    );
    removed
}

/// Append the type's default fields that the caller left out.
pub fn apply_type_defaults(field_set: &mut FieldSet, type_def: &WorkItemTypeDef) {
    for (name, value) in &type_def.defaults {
        if !field_set.contains_key(name) {
            debug!(field = %name, "Applying type default");
            field_set.insert(name.clone(), value.clone());
        }
    }
}

/// Pull a readable message out of an error payload.
pub fn remote_error_message(status: u16, body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        for key in ["message", "Message"] {
            if let Some(msg) = json.get(key).and_then(Value::as_str) {
                if !msg.trim().is_empty() {
                    return msg.to_string();
                }
            }
        }
        if let Some(msg) = json
            .get("value")
            .and_then(|v| v.get("Message"))
            .and_then(Value::as_str)
        {
            return msg.to_string();
        }
    }

    let reason = reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unexpected status");
    format!("HTTP {} {}", status, reason)
}

/// Decode a write response. Never fails.
pub fn parse_result(status: u16, body: &str) -> AzureResult {
    if !(200..300).contains(&status) {
        return AzureResult::failed(
            FailureKind::RemoteRejected,
            status,
            remote_error_message(status, body),
        );
    }

    let json: Value = match serde_json::from_str(body) {
        Ok(json) => json,
        Err(e) => {
            debug!("Unreadable success body: {}", e);
            return AzureResult::failed(
                FailureKind::DecodeError,
                status,
                format!("response body is not valid JSON: {}", e),
            );
        }
    };

    let Some(id) = json.get("id").and_then(Value::as_i64) else {
        return AzureResult::failed(
            FailureKind::DecodeError,
            status,
            "response body has no work item id",
        );
    };

    let fields = json
        .get("fields")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_else(Map::new);

    AzureResult::succeeded(Some(id), fields, status, format!("Work item {} saved", id))
}

/// Decode a WIQL response into ids.
pub fn parse_wiql(body: &str) -> Result<Vec<i64>> {
    let response: WiqlResponse = serde_json::from_str(body)
        .map_err(|e| ServiceError::Decode(format!("WIQL response: {}", e)))?;
    Ok(response.work_items.into_iter().map(|r| r.id).collect())
}

/// Decode a batch fetch response.
pub fn parse_work_item_batch(body: &str) -> Result<Vec<WorkItem>> {
    let batch: WorkItemBatch = serde_json::from_str(body)
        .map_err(|e| ServiceError::Decode(format!("work item batch: {}", e)))?;
    Ok(batch.value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StateDef;
    use serde_json::json;

    fn task() -> WorkItemTypeDef {
        WorkItemTypeDef::new(
            "Task",
            vec![
                StateDef::open("To Do"),
                StateDef::open("Doing"),
                StateDef::terminal("Done"),
            ],
        )
    }

    #[test]
    fn test_field_set_last_write_wins_in_place() {
        let mut set = FieldSet::new()
            .with(fields::TITLE, "first")
            .with(fields::STATE, "To Do");
        let previous = set.insert(fields::TITLE, "second");

        assert_eq!(previous, Some(json!("first")));
        let keys: Vec<&str> = set.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![fields::TITLE, fields::STATE]);
        assert_eq!(set.get(fields::TITLE), Some(&json!("second")));
    }

    #[test]
    fn test_field_set_keys_case_sensitive() {
        let set = FieldSet::new()
            .with("System.Title", "a")
            .with("system.title", "b");
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_build_patch_one_op_per_key_in_order() {
        let set: FieldSet = vec![
            (fields::TITLE, json!("Fix login bug")),
            ("System.Description", json!("Users are logged out")),
            (fields::TITLE, json!("Fix login bug (again)")),
        ]
        .into_iter()
        .collect();

        let ops = build_patch(&set).unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].path, "/fields/System.Title");
        assert_eq!(ops[0].value, Some(json!("Fix login bug (again)")));
        assert_eq!(ops[1].path, "/fields/System.Description");
        assert!(ops.iter().all(|op| op.op == PatchOp::Add));
    }

    #[test]
    fn test_build_patch_wire_shape() {
        let set = FieldSet::new().with(fields::TITLE, "Fix login bug");
        let body = serde_json::to_value(build_patch(&set).unwrap()).unwrap();
        assert_eq!(
            body,
            json!([{"op": "add", "path": "/fields/System.Title", "value": "Fix login bug"}])
        );
    }

    #[test]
    fn test_numeric_fields_encoded_as_numbers() {
        let set = FieldSet::new()
            .with(fields::PRIORITY, "2")
            .with(fields::REMAINING_WORK, "1.5")
            .with("Custom.Ticket", "42");
        let ops = build_patch(&set).unwrap();
        assert_eq!(ops[0].value, Some(json!(2)));
        assert_eq!(ops[1].value, Some(json!(1.5)));
        // Only declared numeric fields are coerced.
        assert_eq!(ops[2].value, Some(json!("42")));
    }

    #[test]
    fn test_numeric_field_rejects_garbage() {
        let set = FieldSet::new().with(fields::PRIORITY, "urgent");
        assert!(matches!(build_patch(&set), Err(ServiceError::Validation(_))));
    }

    #[test]
    fn test_unknown_field_namespace_rejected() {
        for bad in ["Title", "System.", "Foo.Bar", "System.Bad Name", "System.a/b"] {
            let set = FieldSet::new().with(bad, "x");
            assert!(
                matches!(build_patch(&set), Err(ServiceError::Validation(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_strip_terminal_state_case_insensitive() {
        let mut set = FieldSet::new()
            .with(fields::TITLE, "Fix login bug")
            .with(fields::STATE, "done");
        let removed = strip_terminal_state(&mut set, &task());
        assert_eq!(removed, Some(json!("done")));
        assert!(!set.contains_key(fields::STATE));

        let ops = build_patch(&set).unwrap();
        assert!(ops.iter().all(|op| op.field_name() != Some(fields::STATE)));
    }

    #[test]
    fn test_strip_keeps_open_state() {
        let mut set = FieldSet::new().with(fields::STATE, "Doing");
        assert_eq!(strip_terminal_state(&mut set, &task()), None);
        assert!(set.contains_key(fields::STATE));
    }

    #[test]
    fn test_apply_type_defaults_does_not_override() {
        let mut def = task();
        def.defaults.insert(fields::PRIORITY.to_string(), json!(2));
        def.defaults.insert("System.Tags".to_string(), json!("triage"));

        let mut set = FieldSet::new()
            .with(fields::TITLE, "t")
            .with(fields::PRIORITY, 1);
        apply_type_defaults(&mut set, &def);

        assert_eq!(set.get(fields::PRIORITY), Some(&json!(1)));
        assert_eq!(set.get("System.Tags"), Some(&json!("triage")));
        assert_eq!(set.iter().last().map(|(k, _)| k), Some("System.Tags"));
    }

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            FieldSet::parse_assignment("Microsoft.VSTS.Common.Priority=2").unwrap(),
            (fields::PRIORITY.to_string(), json!(2))
        );
        assert_eq!(
            FieldSet::parse_assignment("System.Title = Fix login bug").unwrap(),
            (fields::TITLE.to_string(), json!("Fix login bug"))
        );
        assert!(FieldSet::parse_assignment("no-equals").is_err());
        assert!(FieldSet::parse_assignment("=value").is_err());
    }

    #[test]
    fn test_parse_result_success() {
        let body = json!({
            "id": 101,
            "rev": 1,
            "fields": {"System.Title": "Fix login bug", "System.State": "To Do"}
        })
        .to_string();
        let result = parse_result(200, &body);
        assert!(result.success);
        assert_eq!(result.id, Some(101));
        assert_eq!(result.title(), Some("Fix login bug"));
        assert_eq!(result.status_code, 200);
        assert_eq!(result.failure, None);
    }

    #[test]
    fn test_fields_roundtrip_through_result() {
        let set = FieldSet::new()
            .with(fields::TITLE, "Fix login bug")
            .with(fields::PRIORITY, 2);
        let ops = build_patch(&set).unwrap();

        // Simulate the service echoing the fields plus its own.
        let mut echoed = Map::new();
        for op in &ops {
            echoed.insert(op.field_name().unwrap().to_string(), op.value.clone().unwrap());
        }
        echoed.insert("System.CreatedDate".to_string(), json!("2026-10-16T00:00:00Z"));
        let body = json!({"id": 5, "fields": echoed}).to_string();

        let result = parse_result(200, &body);
        let reencoded: FieldSet = result
            .fields
            .iter()
            .filter(|(k, _)| set.contains_key(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (name, value) in set.iter() {
            assert_eq!(reencoded.get(name), Some(value));
        }
    }

    #[test]
    fn test_parse_result_remote_error_message() {
        let body = json!({
            "$id": "1",
            "message": "TF401232: Work item 999 does not exist.",
            "typeKey": "WorkItemUnauthorizedAccessException"
        })
        .to_string();
        let result = parse_result(404, &body);
        assert!(!result.success);
        assert_eq!(result.id, None);
        assert_eq!(result.failure, Some(FailureKind::RemoteRejected));
        assert!(result.message.starts_with("RemoteRejected: "));
        assert!(result.message.contains("TF401232"));
    }

    #[test]
    fn test_parse_result_generic_status_message() {
        let result = parse_result(503, "<html>down</html>");
        assert_eq!(result.failure, Some(FailureKind::RemoteRejected));
        assert!(result.message.contains("HTTP 503 Service Unavailable"));
    }

    #[test]
    fn test_parse_result_malformed_success_body() {
        let result = parse_result(200, "{not json");
        assert!(!result.success);
        assert_eq!(result.id, None);
        assert_eq!(result.failure, Some(FailureKind::DecodeError));
        assert!(result.message.starts_with("DecodeError: "));
    }

    #[test]
    fn test_parse_result_success_without_id() {
        let result = parse_result(200, r#"{"fields": {}}"#);
        assert_eq!(result.failure, Some(FailureKind::DecodeError));
        assert_eq!(result.id, None);
    }

    #[test]
    fn test_parse_wiql_and_batch() {
        let ids = parse_wiql(r#"{"workItems": [{"id": 3}, {"id": 9}]}"#).unwrap();
        assert_eq!(ids, vec![3, 9]);

        let items = parse_work_item_batch(
            r#"{"count": 1, "value": [{"id": 3, "fields": {"System.Title": "a"}}]}"#,
        )
        .unwrap();
        assert_eq!(items[0].title(), Some("a"));

        assert!(matches!(parse_wiql("oops"), Err(ServiceError::Decode(_))));
    }
}
