//! Request and response shapes of the Data Cloud query and focus APIs

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Bind parameter for a `:name` placeholder in a SQL statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlParameter {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub value: Value,
}

impl SqlParameter {
    pub fn varchar(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: "Varchar".into(),
            name: name.into(),
            value: Value::String(value.into()),
        }
    }
}

/// All rows of a finished query plus the column metadata of the first response.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResult {
    pub data: Vec<Value>,
    pub metadata: Value,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A column the focus service considers relevant to an utterance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSuggestion {
    pub column: String,
    pub table: String,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueryStatus {
    #[serde(default)]
    pub query_id: Option<String>,
    #[serde(default)]
    pub completion_status: Option<String>,
    #[serde(default)]
    pub row_count: Option<u64>,
}

impl QueryStatus {
    /// Whether every row is available for paging.
    pub fn is_complete(&self) -> bool {
        matches!(
            self.completion_status.as_deref(),
            Some("Finished") | Some("ResultsProduced")
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubmitResponse {
    #[serde(default)]
    pub status: QueryStatus,
    #[serde(default)]
    pub query_id: Option<String>,
    #[serde(default)]
    pub data: Option<Vec<Value>>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RowsPage {
    #[serde(default)]
    pub data: Option<Vec<Value>>,
    #[serde(default)]
    pub returned_rows: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FocusResponse {
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub entities: Vec<FocusEntity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FocusEntity {
    pub qualified_name: String,
    pub parent_id: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl From<FocusEntity> for FieldSuggestion {
    fn from(entity: FocusEntity) -> Self {
        let column = entity
            .qualified_name
            .replace(&format!("{}.", entity.parent_id), "")
            .replace("default.", "");
        Self {
            column,
            table: entity.parent_id,
            description: entity.description,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varchar_parameter_wire_shape() {
        let param = SqlParameter::varchar("tablename", "Account__dlm");
        assert_eq!(
            serde_json::to_value(&param).unwrap(),
            serde_json::json!({"type": "Varchar", "name": "tablename", "value": "Account__dlm"})
        );
    }

    #[test]
    fn completion_states() {
        let status = |s: &str| QueryStatus {
            completion_status: Some(s.into()),
            ..Default::default()
        };
        assert!(status("Finished").is_complete());
        assert!(status("ResultsProduced").is_complete());
        assert!(!status("Running").is_complete());
        assert!(!QueryStatus::default().is_complete());
    }

    #[test]
    fn focus_entity_strips_table_and_dataspace_prefix() {
        let entity: FocusEntity = serde_json::from_value(serde_json::json!({
            "qualifiedName": "default.Account__dlm.Name__c",
            "parentId": "Account__dlm",
            "description": "Account name"
        }))
        .unwrap();
        let suggestion = FieldSuggestion::from(entity);
        assert_eq!(suggestion.column, "Name__c");
        assert_eq!(suggestion.table, "Account__dlm");
        assert_eq!(suggestion.description.as_deref(), Some("Account name"));
    }

    #[test]
    fn submit_response_tolerates_missing_fields() {
        let parsed: SubmitResponse =
            serde_json::from_str(r#"{"status":{"queryId":"q1","completionStatus":"Running"}}"#)
                .unwrap();
        assert_eq!(parsed.status.query_id.as_deref(), Some("q1"));
        assert!(parsed.data.is_none());
        assert!(parsed.status.row_count.is_none());
    }
}
