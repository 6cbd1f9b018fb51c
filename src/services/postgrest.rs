//! PostgREST client for the tabular data service
//!
//! Encodes a [`BackendQuery`] as a REST request:
//! - filters become `column=op.value` query parameters, `or=(...)` for disjunctions
//! - ordering becomes `order=a.asc,b.desc`, the row window `offset`/`limit`
//! - single-row reads ask for `application/vnd.pgrst.object+json`
//! - counts use `Prefer: count=exact` and the `Content-Range` total

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_RANGE, HeaderMap};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::config::Config;
use crate::orm::{Action, Backend, BackendError, BackendQuery, BackendResponse, CredentialInfo};

const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

/// REST data service client
#[derive(Clone)]
pub struct PostgrestClient {
    base_url: String,
    api_key: String,
    schema: Option<String>,
    client: Client,
}

impl PostgrestClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            schema: None,
            client: Client::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let client = Self::new(config.supabase_url.clone(), config.api_key.clone());
        match &config.schema {
            Some(schema) => client.with_schema(schema.clone()),
            None => client,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    fn endpoint(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn method(query: &BackendQuery) -> Method {
        match query.action {
            Action::Select { head: true } => Method::HEAD,
            Action::Select { head: false } => Method::GET,
            Action::Insert(_) => Method::POST,
            Action::Update(_) => Method::PATCH,
            Action::Delete => Method::DELETE,
        }
    }

    /// Query-string parameters for `query`, in call order.
    pub fn query_params(query: &BackendQuery) -> Vec<(String, String)> {
        let mut params = Vec::new();

        if let Some(columns) = &query.columns {
            params.push(("select".to_string(), columns.clone()));
        }
        params.extend(query.filters.iter().map(|call| call.to_param()));

        if !query.order.is_empty() {
            let order: Vec<String> = query
                .order
                .iter()
                .map(|term| format!("{}.{}", term.column, term.direction.as_str()))
                .collect();
            params.push(("order".to_string(), order.join(",")));
        }

        match (query.range, query.limit) {
            (Some((from, to)), _) => {
                params.push(("offset".to_string(), from.to_string()));
                let limit = to.saturating_sub(from).saturating_add(1);
                params.push(("limit".to_string(), limit.to_string()));
            }
            (None, Some(limit)) => params.push(("limit".to_string(), limit.to_string())),
            (None, None) => {}
        }
        params
    }

    /// `Prefer` header value, if any preference applies.
    pub fn prefer(query: &BackendQuery) -> Option<String> {
        let mut prefs = Vec::new();
        if !matches!(query.action, Action::Select { .. }) {
            prefs.push(if query.columns.is_some() {
                "return=representation"
            } else {
                "return=minimal"
            });
        }
        if query.count {
            prefs.push("count=exact");
        }
        (!prefs.is_empty()).then(|| prefs.join(","))
    }

    fn parse_error(status: StatusCode, body: &str) -> BackendError {
        match serde_json::from_str::<BackendError>(body) {
            Ok(err) if !err.message.is_empty() || err.code.is_some() => err,
            _ if body.trim().is_empty() => BackendError::transport(status.to_string()),
            _ => BackendError::transport(format!("{status}: {body}")),
        }
    }
}

/// Total from `Content-Range: 0-24/573` or `*/0`.
pub fn parse_content_range(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_RANGE)?
        .to_str()
        .ok()?
        .rsplit_once('/')
        .and_then(|(_, total)| total.parse().ok())
}

#[async_trait]
impl Backend for PostgrestClient {
    async fn execute(&self, query: &BackendQuery) -> BackendResponse {
        let url = self.endpoint(&query.table);
        let method = Self::method(query);
        debug!(url = %url, method = %method, "Sending data service request");

        let mut request = self
            .client
            .request(method.clone(), &url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("apikey", &self.api_key)
            .query(&Self::query_params(query));

        if query.single {
            request = request.header(ACCEPT, SINGLE_OBJECT);
        }
        if let Some(prefer) = Self::prefer(query) {
            request = request.header("Prefer", prefer);
        }
        if let Some(schema) = &self.schema {
            let profile = if method == Method::GET || method == Method::HEAD {
                "Accept-Profile"
            } else {
                "Content-Profile"
            };
            request = request.header(profile, schema);
        }
        request = match &query.action {
            Action::Insert(rows) => request.json(rows),
            Action::Update(values) => request.json(values),
            _ => request,
        };

        let resp = match request.send().await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(url = %url, error = %err, "Data service request failed");
                return BackendResponse::failed(BackendError::transport(err.to_string()));
            }
        };

        let status = resp.status();
        let count = parse_content_range(resp.headers());
        let body = match resp.text().await {
            Ok(body) => body,
            Err(err) => {
                return BackendResponse::failed(BackendError::transport(err.to_string()));
            }
        };

        if !status.is_success() {
            let error = Self::parse_error(status, &body);
            debug!(status = %status, code = ?error.code, message = %error.message, "Data service rejected request");
            return BackendResponse::failed(error).with_count(count);
        }

        if body.trim().is_empty() {
            return BackendResponse::ok(None).with_count(count);
        }
        match serde_json::from_str::<JsonValue>(&body) {
            Ok(data) => BackendResponse::ok(Some(data)).with_count(count),
            Err(err) => BackendResponse::failed(BackendError::transport(format!(
                "invalid response body: {err}"
            ))),
        }
    }

    fn credential(&self) -> CredentialInfo {
        CredentialInfo::from_key(&self.api_key)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use reqwest::header::HeaderValue;
    use serde_json::json;

    use super::*;
    use crate::orm::{Direction, Value};

    fn pairs(params: &[(String, String)]) -> Vec<(&str, &str)> {
        params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
    }

    #[test]
    fn test_read_params() {
        let query = BackendQuery::table("orders")
            .select("*")
            .eq("status", "open")
            .gte("total", Value::Int(100))
            .order("due_date", Direction::Asc)
            .order("created_at", Direction::Desc)
            .range(10, 14);

        assert_eq!(
            pairs(&PostgrestClient::query_params(&query)),
            vec![
                ("select", "*"),
                ("status", "eq.open"),
                ("total", "gte.100"),
                ("order", "due_date.asc,created_at.desc"),
                ("offset", "10"),
                ("limit", "5"),
            ]
        );
        assert_eq!(PostgrestClient::prefer(&query), None);
    }

    #[test]
    fn test_first_row_uses_limit() {
        let query = BackendQuery::table("orders").select("*").limit(1).single();
        assert_eq!(
            pairs(&PostgrestClient::query_params(&query)),
            vec![("select", "*"), ("limit", "1")]
        );
    }

    #[test]
    fn test_saturated_window_keeps_limit_finite() {
        let query = BackendQuery::table("orders").select("*").range(10, u64::MAX);
        assert_eq!(
            pairs(&PostgrestClient::query_params(&query)),
            vec![
                ("select", "*"),
                ("offset", "10"),
                ("limit", "18446744073709551606"),
            ]
        );
    }

    #[test]
    fn test_write_preferences() {
        let returning = BackendQuery::table("orders")
            .insert(vec![json!({"id": "o1"}).as_object().cloned().unwrap()])
            .select("*");
        assert_eq!(
            PostgrestClient::prefer(&returning).as_deref(),
            Some("return=representation")
        );

        let minimal = BackendQuery::table("orders").delete();
        assert_eq!(PostgrestClient::prefer(&minimal).as_deref(), Some("return=minimal"));

        let count = BackendQuery::table("orders").select("*").head_count();
        assert_eq!(PostgrestClient::prefer(&count).as_deref(), Some("count=exact"));
        assert_eq!(PostgrestClient::method(&count), Method::HEAD);
    }

    #[test]
    fn test_content_range_total() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_RANGE, HeaderValue::from_static("0-24/573"));
        assert_eq!(parse_content_range(&headers), Some(573));
        headers.insert(CONTENT_RANGE, HeaderValue::from_static("*/0"));
        assert_eq!(parse_content_range(&headers), Some(0));
        headers.insert(CONTENT_RANGE, HeaderValue::from_static("0-24/*"));
        assert_eq!(parse_content_range(&headers), None);
    }

    #[test]
    fn test_error_body_parsing() {
        let err = PostgrestClient::parse_error(
            StatusCode::NOT_ACCEPTABLE,
            r#"{"code":"PGRST116","message":"JSON object requested, multiple (or no) rows returned","details":"The result contains 0 rows","hint":null}"#,
        );
        assert_eq!(err.code.as_deref(), Some("PGRST116"));

        let opaque = PostgrestClient::parse_error(StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(opaque.code, None);
        assert_eq!(opaque.message, "502 Bad Gateway: upstream down");
    }

    #[test]
    fn test_credential_hint() {
        let client = PostgrestClient::new("https://crm.example.com/", "sb_secret_123456789");
        assert_eq!(client.endpoint("orders"), "https://crm.example.com/rest/v1/orders");
        assert_eq!(client.credential().prefix.as_deref(), Some("sb_secre"));
    }
}
