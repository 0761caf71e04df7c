//! Data Cloud query client
//!
//! Every call goes through the authenticated gateway, so callers never see
//! tokens. A query is submitted once, long-polled until the service reports
//! that results are available, then paged until every row is collected.

use std::time::Duration;

use datacloud_session::{ApiRequest, Gateway};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::{Error, Result, describe_error_body};
use crate::types::{
    FieldSuggestion, FocusResponse, QueryResult, QueryStatus, RowsPage, SqlParameter,
    SubmitResponse,
};

/// Table names visible in the dataspace, filtered by a LIKE pattern.
const LIST_TABLES_SQL: &str = "SELECT c.relname AS TABLE_NAME FROM pg_catalog.pg_namespace n, pg_catalog.pg_class c LEFT JOIN pg_catalog.pg_description d ON (c.oid = d.objoid AND d.objsubid = 0  and d.classoid = 'pg_class'::regclass) WHERE c.relnamespace = n.oid AND c.relname LIKE :default_list_table_filter";

/// Column names of one table.
const DESCRIBE_TABLE_SQL: &str = "SELECT a.attname FROM pg_catalog.pg_namespace n JOIN pg_catalog.pg_class c ON (c.relnamespace = n.oid) JOIN pg_catalog.pg_attribute a ON (a.attrelid = c.oid) JOIN pg_catalog.pg_type t ON (a.atttypid = t.oid) LEFT JOIN pg_catalog.pg_attrdef def ON (a.attrelid = def.adrelid AND a.attnum = def.adnum) LEFT JOIN pg_catalog.pg_description dsc ON (c.oid = dsc.objoid AND a.attnum = dsc.objsubid) LEFT JOIN pg_catalog.pg_class dc ON (dc.oid = dsc.classoid AND dc.relname = 'pg_class') LEFT JOIN pg_catalog.pg_namespace dn ON (dc.relnamespace = dn.oid AND dn.nspname = 'pg_catalog') WHERE a.attnum > 0 AND NOT a.attisdropped AND c.relname=:tablename";

/// Knobs for the query lifecycle.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// REST API version segment, e.g. `v63.0`
    pub api_version: String,
    pub dataspace: String,
    pub workload_name: Option<String>,
    /// `rowLimit` for each rows page
    pub page_size: u32,
    /// Long-poll duration requested from the service per status call
    pub poll_wait: Duration,
    pub submit_timeout: Duration,
    pub poll_timeout: Duration,
    pub rows_timeout: Duration,
    /// Upper bound for submit + polling + paging of one query
    pub query_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            api_version: "v63.0".into(),
            dataspace: "default".into(),
            workload_name: None,
            page_size: 100_000,
            poll_wait: Duration::from_secs(10),
            submit_timeout: Duration::from_secs(100),
            poll_timeout: Duration::from_secs(30),
            rows_timeout: Duration::from_secs(60),
            query_timeout: Duration::from_secs(600),
        }
    }
}

/// Client for the Data Cloud query and focus endpoints.
#[derive(Clone)]
pub struct DataCloudClient {
    gateway: Gateway,
    options: ClientOptions,
}

impl DataCloudClient {
    pub fn new(gateway: Gateway, options: ClientOptions) -> Self {
        Self { gateway, options }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Execute `sql` and collect every row.
    pub async fn run_query(&self, sql: &str, parameters: &[SqlParameter]) -> Result<QueryResult> {
        let limit = self.options.query_timeout;
        tokio::time::timeout(limit, self.execute_query(sql, parameters))
            .await
            .map_err(|_| Error::QueryTimeout(limit))?
    }

    /// Table names matching the LIKE `pattern`.
    pub async fn list_tables(&self, pattern: &str) -> Result<Vec<String>> {
        let result = self
            .run_query(
                LIST_TABLES_SQL,
                &[SqlParameter::varchar("default_list_table_filter", pattern)],
            )
            .await?;
        Ok(first_column(&result))
    }

    /// Column names of `table`.
    pub async fn describe_table(&self, table: &str) -> Result<Vec<String>> {
        let result = self
            .run_query(
                DESCRIBE_TABLE_SQL,
                &[SqlParameter::varchar("tablename", table)],
            )
            .await?;
        Ok(first_column(&result))
    }

    /// Tables and columns the focus service associates with `utterance`.
    pub async fn suggest_fields(&self, utterance: &str) -> Result<Vec<FieldSuggestion>> {
        let path = format!("/services/data/{}/v1/prism/focus", self.options.api_version);
        let body = json!({
            "utterance": utterance,
            "appId": "mcpServer",
            "dataSources": [{"dataSourceType": "DATACLOUD"}],
        });
        let response: FocusResponse = self.send(ApiRequest::post(path, body)).await?;
        if let Some(error) = response.error {
            let message = match error {
                Value::String(s) => s,
                other => other.to_string(),
            };
            return Err(Error::Suggestion(message));
        }
        debug!(entities = response.entities.len(), "focus response");
        Ok(response
            .entities
            .into_iter()
            .map(FieldSuggestion::from)
            .collect())
    }

    async fn execute_query(&self, sql: &str, parameters: &[SqlParameter]) -> Result<QueryResult> {
        let base = format!("/services/data/{}/ssot/query-sql", self.options.api_version);

        info!(dataspace = %self.options.dataspace, sql_len = sql.len(), "submitting SQL query");
        let body = json!({ "sql": sql, "sqlParameters": parameters });
        let submit: SubmitResponse = self
            .send(
                self.scoped(ApiRequest::post(base.as_str(), body))
                    .timeout(self.options.submit_timeout),
            )
            .await?;

        let query_id = submit
            .status
            .query_id
            .clone()
            .or(submit.query_id)
            .ok_or(Error::MissingQueryId)?;
        let mut rows = submit.data.unwrap_or_default();
        let metadata = submit.metadata;
        let mut status = submit.status;

        let mut polls = 0u32;
        while !status.is_complete() {
            polls += 1;
            debug!(query_id = %query_id, attempt = polls, "polling query status");
            status = self
                .send::<QueryStatus>(
                    self.scoped(ApiRequest::get(format!("{base}/{query_id}")))
                        .query("waitTimeMs", self.options.poll_wait.as_millis())
                        .timeout(self.options.poll_timeout),
                )
                .await?;
        }

        let total = status
            .row_count
            .map(|count| count as usize)
            .unwrap_or(rows.len());
        while rows.len() < total {
            let offset = rows.len();
            let page: RowsPage = self
                .send(
                    self.scoped(ApiRequest::get(format!("{base}/{query_id}/rows")))
                        .query("rowLimit", self.options.page_size)
                        .query("offset", offset)
                        .query("omitSchema", "true")
                        .timeout(self.options.rows_timeout),
                )
                .await?;
            let chunk = page.data.unwrap_or_default();
            let returned = page
                .returned_rows
                .map(|count| count as usize)
                .unwrap_or(chunk.len());
            if returned == 0 || chunk.is_empty() {
                return Err(Error::MissingRows { offset });
            }
            rows.extend(chunk);
            debug!(query_id = %query_id, fetched = returned, total_so_far = rows.len(), "fetched rows page");
        }

        info!(query_id = %query_id, rows = rows.len(), polls, "query completed");
        Ok(QueryResult {
            data: rows,
            metadata,
        })
    }

    /// Attach the dataspace (and workload name) every query endpoint expects.
    fn scoped(&self, request: ApiRequest) -> ApiRequest {
        let request = request.query("dataspace", &self.options.dataspace);
        match &self.options.workload_name {
            Some(workload) => request.query("workloadName", workload),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let response = self.gateway.call(&request).await?;
        let status = response.status();
        if status.as_u16() >= 300 {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
                message: describe_error_body(&body),
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| Error::Decode(format!("{} {}: {e}", request.method, request.path)))
    }
}

fn first_column(result: &QueryResult) -> Vec<String> {
    result
        .data
        .iter()
        .filter_map(|row| row.get(0).and_then(Value::as_str).map(str::to_string))
        .collect()
}
