//! Azure DevOps request and response types.
//!
//! These types model the Work Item Tracking REST API (version 7.1) payloads
//! and the result structure handed back to callers.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FailureKind;

/// Field reference names used by the service.
pub mod fields {
    /// Work item title.
    pub const TITLE: &str = "System.Title";
    /// Workflow state.
    pub const STATE: &str = "System.State";
    /// Work item type name.
    pub const WORK_ITEM_TYPE: &str = "System.WorkItemType";
    /// Numeric priority level.
    pub const PRIORITY: &str = "Microsoft.VSTS.Common.Priority";
    /// Story points estimate.
    pub const STORY_POINTS: &str = "Microsoft.VSTS.Scheduling.StoryPoints";
    /// Effort estimate.
    pub const EFFORT: &str = "Microsoft.VSTS.Scheduling.Effort";
    /// Remaining work in hours.
    pub const REMAINING_WORK: &str = "Microsoft.VSTS.Scheduling.RemainingWork";
    /// Original estimate in hours.
    pub const ORIGINAL_ESTIMATE: &str = "Microsoft.VSTS.Scheduling.OriginalEstimate";
    /// Completed work in hours.
    pub const COMPLETED_WORK: &str = "Microsoft.VSTS.Scheduling.CompletedWork";

    /// Prefixes of the remote schema's field namespaces.
    pub const KNOWN_PREFIXES: &[&str] = &["System.", "Microsoft.VSTS.", "Custom."];

    /// Fields declared as numbers in the remote schema.
    pub const NUMERIC: &[&str] = &[
        PRIORITY,
        STORY_POINTS,
        EFFORT,
        REMAINING_WORK,
        ORIGINAL_ESTIMATE,
        COMPLETED_WORK,
    ];
}

/// The outcome of one write against the remote service.
///
/// Immutable once built; a failed result never carries an identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureResult {
    /// Whether the remote service accepted the request.
    pub success: bool,
    /// The remote work item id.
    pub id: Option<i64>,
    /// The field snapshot returned by the remote service.
    pub fields: Map<String, Value>,
    /// Human-readable outcome.
    pub message: String,
    /// The raw HTTP status code.
    pub status_code: u16,
    /// Classification of a failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl AzureResult {
    /// A successful result.
    pub fn succeeded(
        id: Option<i64>,
        fields: Map<String, Value>,
        status_code: u16,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: true,
            id,
            fields,
            message: message.into(),
            status_code,
            failure: None,
        }
    }

    /// A failed result. The message is prefixed with the failure label.
    pub fn failed(kind: FailureKind, status_code: u16, detail: impl fmt::Display) -> Self {
        Self {
            success: false,
            id: None,
            fields: Map::new(),
            message: format!("{}: {}", kind.label(), detail),
            status_code,
            failure: Some(kind),
        }
    }

    /// The title in the field snapshot.
    pub fn title(&self) -> Option<&str> {
        self.fields.get(fields::TITLE).and_then(Value::as_str)
    }

    /// The state in the field snapshot.
    pub fn state(&self) -> Option<&str> {
        self.fields.get(fields::STATE).and_then(Value::as_str)
    }
}

impl fmt::Display for AzureResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.success, self.id) {
            (true, Some(id)) => write!(f, "#{}: {}", id, self.message),
            _ => write!(f, "{}", self.message),
        }
    }
}

/// A work item as returned by the batch endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// The work item id.
    pub id: i64,
    /// Revision number.
    #[serde(default)]
    pub rev: Option<i64>,
    /// Field reference name to value.
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// REST URL of the item.
    #[serde(default)]
    pub url: Option<String>,
}

impl WorkItem {
    fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// The title.
    pub fn title(&self) -> Option<&str> {
        self.field_str(fields::TITLE)
    }

    /// The state name.
    pub fn state(&self) -> Option<&str> {
        self.field_str(fields::STATE)
    }

    /// The type name.
    pub fn work_item_type(&self) -> Option<&str> {
        self.field_str(fields::WORK_ITEM_TYPE)
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}: {}", self.id, self.title().unwrap_or(""))
    }
}

/// Body of `POST _apis/wit/wiql`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WiqlRequest {
    /// The WIQL text.
    pub query: String,
}

impl WiqlRequest {
    /// Most recently changed items of the connection's project.
    pub fn recent_in_project() -> Self {
        Self {
            query: "SELECT [System.Id] FROM WorkItems \
                    WHERE [System.TeamProject] = @project \
                    ORDER BY [System.ChangedDate] DESC"
                .to_string(),
        }
    }
}

/// Response of a flat WIQL query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WiqlResponse {
    /// Matched item references, in query order.
    #[serde(default)]
    pub work_items: Vec<WorkItemReference>,
}

/// An id-only reference to a work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItemReference {
    /// The work item id.
    pub id: i64,
    /// REST URL of the item.
    #[serde(default)]
    pub url: Option<String>,
}

/// Response of `GET _apis/wit/workitems?ids=...`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItemBatch {
    /// Number of items.
    #[serde(default)]
    pub count: u32,
    /// The items.
    #[serde(default)]
    pub value: Vec<WorkItem>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failed_result_has_no_id_and_labelled_message() {
        let result = AzureResult::failed(FailureKind::RemoteRejected, 404, "not found");
        assert!(!result.success);
        assert_eq!(result.id, None);
        assert_eq!(result.message, "RemoteRejected: not found");
        assert_eq!(result.failure, Some(FailureKind::RemoteRejected));
    }

    #[test]
    fn test_result_accessors() {
        let mut fields = Map::new();
        fields.insert(fields::TITLE.to_string(), json!("Fix login bug"));
        fields.insert(fields::STATE.to_string(), json!("To Do"));
        let result = AzureResult::succeeded(Some(12), fields, 200, "created");
        assert_eq!(result.title(), Some("Fix login bug"));
        assert_eq!(result.state(), Some("To Do"));
        assert_eq!(result.to_string(), "#12: created");
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = AzureResult::succeeded(Some(1), Map::new(), 200, "ok");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["statusCode"], json!(200));
        assert!(value.get("failure").is_none());
    }

    #[test]
    fn test_work_item_deserialize() {
        let item: WorkItem = serde_json::from_value(json!({
            "id": 7,
            "rev": 3,
            "fields": {
                "System.Title": "Crash on save",
                "System.State": "Active",
                "System.WorkItemType": "Bug"
            },
            "url": "https://dev.azure.com/contoso/_apis/wit/workItems/7"
        }))
        .unwrap();
        assert_eq!(item.id, 7);
        assert_eq!(item.title(), Some("Crash on save"));
        assert_eq!(item.state(), Some("Active"));
        assert_eq!(item.work_item_type(), Some("Bug"));
        assert_eq!(item.to_string(), "#7: Crash on save");
    }

    #[test]
    fn test_wiql_response_deserialize() {
        let response: WiqlResponse = serde_json::from_value(json!({
            "queryType": "flat",
            "workItems": [{"id": 1, "url": "u1"}, {"id": 2, "url": "u2"}]
        }))
        .unwrap();
        let ids: Vec<i64> = response.work_items.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_wiql_request_targets_project() {
        assert!(WiqlRequest::recent_in_project().query.contains("@project"));
    }
}
