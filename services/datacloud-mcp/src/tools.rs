//! Data Cloud tools exposed over MCP
//!
//! Each tool validates its arguments, runs through the Data Cloud client
//! (which obtains tokens on demand), and renders the result as JSON text.

use std::future::Future;
use std::pin::Pin;

use datacloud_api::{DataCloudClient, QueryResult};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::protocol::ToolDefinition;

/// Text returned by `query` when the result has no rows.
pub const EMPTY_RESULT: &str = "(empty)";

/// Tool registry the MCP server dispatches to.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn ToolHandler>`).
pub trait ToolHandler: Send + Sync {
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Run tool `name`. `arguments` is `Value::Null` when the client sent none.
    fn call<'a>(
        &'a self,
        name: &'a str,
        arguments: Value,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;
}

/// The four Data Cloud tools.
pub struct DataCloudTools {
    client: DataCloudClient,
    default_table_filter: String,
}

#[derive(Debug, Deserialize)]
struct QueryArgs {
    sql: String,
}

#[derive(Debug, Deserialize)]
struct ListTablesArgs {
    #[serde(default)]
    pattern: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DescribeTableArgs {
    table: String,
}

#[derive(Debug, Deserialize)]
struct SuggestArgs {
    utterance: String,
}

impl DataCloudTools {
    pub fn new(client: DataCloudClient, default_table_filter: impl Into<String>) -> Self {
        Self {
            client,
            default_table_filter: default_table_filter.into(),
        }
    }

    async fn dispatch(&self, name: &str, arguments: Value) -> Result<String> {
        match name {
            "query" => {
                let args: QueryArgs = parse_args(arguments)?;
                require_non_empty("sql", &args.sql)?;
                let result = self.client.run_query(&args.sql, &[]).await?;
                Ok(format_rows(&result))
            }
            "list_tables" => {
                let args: ListTablesArgs = parse_args(arguments)?;
                let pattern = args
                    .pattern
                    .filter(|p| !p.trim().is_empty())
                    .unwrap_or_else(|| self.default_table_filter.clone());
                let tables = self.client.list_tables(&pattern).await?;
                Ok(json!(tables).to_string())
            }
            "describe_table" => {
                let args: DescribeTableArgs = parse_args(arguments)?;
                require_non_empty("table", &args.table)?;
                let columns = self.client.describe_table(&args.table).await?;
                Ok(json!(columns).to_string())
            }
            "suggest_table_and_fields" => {
                let args: SuggestArgs = parse_args(arguments)?;
                require_non_empty("utterance", &args.utterance)?;
                let suggestions = self.client.suggest_fields(&args.utterance).await?;
                Ok(json!(suggestions).to_string())
            }
            other => Err(Error::UnknownTool(other.to_string())),
        }
    }
}

impl ToolHandler for DataCloudTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        tool_definitions()
    }

    fn call<'a>(
        &'a self,
        name: &'a str,
        arguments: Value,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(self.dispatch(name, arguments))
    }
}

pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "query",
            description: "Executes a SQL query and returns the results",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "sql": {
                        "type": "string",
                        "description": "A SQL query in the PostgreSQL dialect. Always quote all identifiers and use their exact casing. Verify which tables and fields to use first through suggest_table_and_fields (or list_tables / describe_table). Before running the query, give the user a short summary of what it does."
                    }
                },
                "required": ["sql"]
            }),
        },
        ToolDefinition {
            name: "list_tables",
            description: "Lists the available tables in the database",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "pattern": {
                        "type": "string",
                        "description": "Optional SQL LIKE pattern for table names"
                    }
                }
            }),
        },
        ToolDefinition {
            name: "describe_table",
            description: "Describes the columns of a table",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "table": {"type": "string", "description": "The table name"}
                },
                "required": ["table"]
            }),
        },
        ToolDefinition {
            name: "suggest_table_and_fields",
            description: "Suggests tables and fields from the database that could be relevant to a user question",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "utterance": {
                        "type": "string",
                        "description": "A prompt that describes the task or data needed to formulate a query"
                    }
                },
                "required": ["utterance"]
            }),
        },
    ]
}

fn parse_args<T: DeserializeOwned>(arguments: Value) -> Result<T> {
    let arguments = if arguments.is_null() {
        json!({})
    } else {
        arguments
    };
    serde_json::from_value(arguments).map_err(|e| Error::InvalidParams(e.to_string()))
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidParams(format!("`{field}` must not be empty")));
    }
    Ok(())
}

fn format_rows(result: &QueryResult) -> String {
    if result.is_empty() {
        EMPTY_RESULT.to_string()
    } else {
        Value::Array(result.data.clone()).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::Json;
    use axum::extract::State;
    use axum::routing::post;
    use datacloud_api::ClientOptions;
    use datacloud_auth::{ClientRegistration, Credential, TokenStore, now_millis};
    use datacloud_session::{Gateway, OAuthController};
    use tokio::net::TcpListener;

    type Bodies = Arc<Mutex<Vec<Value>>>;

    /// Query endpoint answering every submit with `reply`; records request bodies.
    async fn start_query_api(reply: Value) -> (String, Bodies) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let bodies: Bodies = Arc::new(Mutex::new(Vec::new()));
        let app = axum::Router::new()
            .route(
                "/services/data/v63.0/ssot/query-sql",
                post(
                    |State((reply, bodies)): State<(Value, Bodies)>, Json(body): Json<Value>| async move {
                        bodies.lock().unwrap().push(body);
                        Json(reply)
                    },
                ),
            )
            .with_state((reply, bodies.clone()));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), bodies)
    }

    async fn data_cloud_tools(instance_url: &str) -> DataCloudTools {
        let registration = ClientRegistration::new(
            "client-id",
            "client-secret",
            "http://127.0.0.1:9",
            "http://127.0.0.1:0/Callback",
        );
        let store = Arc::new(TokenStore::new());
        store
            .set(Credential::new("T1", None, instance_url, now_millis(), 6600))
            .await;
        let controller = Arc::new(OAuthController::new(
            registration,
            store,
            reqwest::Client::new(),
        ));
        let client = DataCloudClient::new(
            Gateway::new(controller, reqwest::Client::new()),
            ClientOptions::default(),
        );
        DataCloudTools::new(client, "%")
    }

    #[test]
    fn definitions_cover_all_tools() {
        let names: Vec<_> = tool_definitions().iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec!["query", "list_tables", "describe_table", "suggest_table_and_fields"]
        );
        for tool in tool_definitions() {
            assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
        }
    }

    #[test]
    fn empty_result_renders_placeholder() {
        assert_eq!(format_rows(&QueryResult::default()), "(empty)");
        let result = QueryResult {
            data: vec![json!(["a", 1])],
            metadata: Value::Null,
        };
        assert_eq!(format_rows(&result), r#"[["a",1]]"#);
    }

    #[test]
    fn argument_errors_are_invalid_params() {
        let missing: Result<QueryArgs> = parse_args(Value::Null);
        assert!(matches!(missing, Err(Error::InvalidParams(_))));
        let wrong_type: Result<QueryArgs> = parse_args(json!({"sql": 5}));
        assert!(matches!(wrong_type, Err(Error::InvalidParams(_))));
        let optional: ListTablesArgs = parse_args(Value::Null).unwrap();
        assert!(optional.pattern.is_none());
        assert!(matches!(
            require_non_empty("sql", "  "),
            Err(Error::InvalidParams(_))
        ));
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_arguments_never_reach_the_network() {
        // Nothing listens here; any request would fail with a connection error
        let handler = data_cloud_tools("http://127.0.0.1:9").await;
        assert!(matches!(
            handler.call("drop_everything", Value::Null).await,
            Err(Error::UnknownTool(_))
        ));
        assert!(matches!(
            handler.call("describe_table", json!({"table": ""})).await,
            Err(Error::InvalidParams(_))
        ));
    }

    #[tokio::test]
    async fn query_renders_rows_or_empty() {
        let (base, _) = start_query_api(json!({
            "status": {"queryId": "q1", "completionStatus": "Finished", "rowCount": 0},
            "data": []
        }))
        .await;
        let handler = data_cloud_tools(&base).await;
        let text = handler
            .call("query", json!({"sql": "SELECT 1 WHERE false"}))
            .await
            .unwrap();
        assert_eq!(text, "(empty)");

        let (base, _) = start_query_api(json!({
            "status": {"queryId": "q2", "completionStatus": "Finished", "rowCount": 1},
            "data": [["Acme", 42]]
        }))
        .await;
        let handler = data_cloud_tools(&base).await;
        let text = handler.call("query", json!({"sql": "SELECT 1"})).await.unwrap();
        assert_eq!(text, r#"[["Acme",42]]"#);
    }

    #[tokio::test]
    async fn list_tables_uses_default_filter() {
        let (base, bodies) = start_query_api(json!({
            "status": {"queryId": "q3", "completionStatus": "Finished", "rowCount": 1},
            "data": [["Account__dlm"]]
        }))
        .await;
        let handler = data_cloud_tools(&base).await;

        let text = handler.call("list_tables", json!({})).await.unwrap();
        assert_eq!(text, r#"["Account__dlm"]"#);
        handler
            .call("list_tables", json!({"pattern": "Acc%"}))
            .await
            .unwrap();

        let values: Vec<_> = bodies
            .lock()
            .unwrap()
            .iter()
            .map(|b| b["sqlParameters"][0]["value"].clone())
            .collect();
        assert_eq!(values, vec![json!("%"), json!("Acc%")]);
    }

    #[tokio::test]
    async fn data_cloud_failures_are_tool_errors() {
        let (base, _) = start_query_api(json!({"status": {"completionStatus": "Finished"}})).await;
        let handler = data_cloud_tools(&base).await;

        let err = handler
            .call("query", json!({"sql": "SELECT 1"}))
            .await
            .unwrap_err();
        assert!(!err.is_protocol_error());
        assert_eq!(err.to_string(), "query ID not returned by the API");
    }
}
