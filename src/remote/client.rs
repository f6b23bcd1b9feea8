use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Method, Response};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use url::Url;

use crate::config::BackendConfig;
use crate::error::RemoteError;
use crate::remote::types::{InventoryItem, Mutation, MutationKind, Pricing};
use crate::sync::{Probe, Replayer, SyncItem};

const INVENTORY_TABLE: &str = "inventory";
const PRICING_TABLE: &str = "ingredient_prices";

/// Client for the hosted database's REST interface
#[derive(Clone)]
pub struct RestClient {
  http: reqwest::Client,
  base: Url,
}

#[derive(Debug, Deserialize)]
struct ApiPriceRow {
  name: String,
  #[serde(default)]
  price: f64,
}

/// Method, target and body for one mutation
#[derive(Debug)]
struct RequestPlan<'a> {
  method: Method,
  url: Url,
  body: Option<&'a serde_json::Value>,
  prefer: &'static str,
}

impl RestClient {
  pub fn new(config: &BackendConfig, api_key: &str) -> Result<Self> {
    let mut base =
      Url::parse(&config.url).map_err(|e| eyre!("Invalid backend url '{}': {}", config.url, e))?;
    // Url::join drops the last path segment unless it ends in '/'
    if !base.path().ends_with('/') {
      base.set_path(&format!("{}/", base.path()));
    }

    let mut headers = HeaderMap::new();
    let key = HeaderValue::from_str(api_key).map_err(|e| eyre!("Invalid API key: {}", e))?;
    headers.insert(HeaderName::from_static("apikey"), key);
    headers.insert(
      AUTHORIZATION,
      HeaderValue::from_str(&format!("Bearer {}", api_key))
        .map_err(|e| eyre!("Invalid API key: {}", e))?,
    );

    let http = reqwest::Client::builder()
      .default_headers(headers)
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http, base })
  }

  /// Apply one queued mutation.
  pub async fn apply(&self, mutation: &Mutation) -> Result<(), RemoteError> {
    let plan = self.plan(mutation)?;

    let mut request = self
      .http
      .request(plan.method, plan.url)
      .header("Prefer", plan.prefer);
    if let Some(body) = plan.body {
      request = request.json(body);
    }

    let response = request.send().await.map_err(transport_error)?;
    check(response).await?;
    Ok(())
  }

  /// Get the current inventory
  pub async fn fetch_inventory(&self) -> Result<Vec<InventoryItem>, RemoteError> {
    let url = self.select(INVENTORY_TABLE, "*")?;
    let response = self.http.get(url).send().await.map_err(transport_error)?;
    check(response)
      .await?
      .json()
      .await
      .map_err(|e| RemoteError::Decode(e.to_string()))
  }

  /// Get the ingredient price table
  pub async fn fetch_pricing(&self) -> Result<Pricing, RemoteError> {
    let url = self.select(PRICING_TABLE, "name,price")?;
    let response = self.http.get(url).send().await.map_err(transport_error)?;
    let rows: Vec<ApiPriceRow> = check(response)
      .await?
      .json()
      .await
      .map_err(|e| RemoteError::Decode(e.to_string()))?;

    Ok(rows.into_iter().map(|row| (row.name, row.price)).collect())
  }

  /// Whether the backend answers at all. Any HTTP response counts.
  pub async fn is_reachable(&self) -> bool {
    self.http.get(self.base.clone()).send().await.is_ok()
  }

  fn table_url(&self, table: &str) -> Result<Url, RemoteError> {
    self.base.join(table).map_err(|e| RemoteError::RemoteRejected {
      status: None,
      message: format!("invalid table name '{}': {}", table, e),
    })
  }

  fn select(&self, table: &str, columns: &str) -> Result<Url, RemoteError> {
    let mut url = self.table_url(table)?;
    url.query_pairs_mut().append_pair("select", columns);
    Ok(url)
  }

  fn plan<'a>(&self, mutation: &'a Mutation) -> Result<RequestPlan<'a>, RemoteError> {
    let mut url = self.table_url(&mutation.table)?;

    if mutation.kind.needs_key() {
      let key = mutation
        .key
        .as_deref()
        .ok_or_else(|| RemoteError::RemoteRejected {
          status: None,
          message: format!("{} on '{}' has no key", mutation.kind, mutation.table),
        })?;
      url.query_pairs_mut().append_pair("id", &format!("eq.{}", key));
    }

    let (method, body, prefer) = match mutation.kind {
      MutationKind::Insert => (Method::POST, Some(&mutation.record), "return=minimal"),
      MutationKind::Upsert => (
        Method::POST,
        Some(&mutation.record),
        "resolution=merge-duplicates,return=minimal",
      ),
      MutationKind::Update => (Method::PATCH, Some(&mutation.record), "return=minimal"),
      MutationKind::Delete => (Method::DELETE, None, "return=minimal"),
    };

    Ok(RequestPlan {
      method,
      url,
      body,
      prefer,
    })
  }
}

impl Replayer<Mutation> for RestClient {
  fn replay(
    &self,
    item: SyncItem<Mutation>,
  ) -> impl Future<Output = Result<(), RemoteError>> + Send {
    async move { self.apply(&item.data).await }
  }
}

impl Probe for RestClient {
  fn check(&self) -> impl Future<Output = bool> + Send {
    self.is_reachable()
  }
}

fn transport_error(e: reqwest::Error) -> RemoteError {
  if e.is_builder() {
    RemoteError::RemoteRejected {
      status: None,
      message: e.to_string(),
    }
  } else {
    RemoteError::NetworkUnavailable(e.to_string())
  }
}

async fn check(response: Response) -> Result<Response, RemoteError> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }
  let body = response.text().await.unwrap_or_default();
  Err(RemoteError::from_status(status.as_u16(), &body))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn client(url: &str) -> RestClient {
    let config = BackendConfig {
      url: url.to_string(),
      timeout_secs: 1,
    };
    RestClient::new(&config, "anon-key").unwrap()
  }

  #[test]
  fn test_base_url_keeps_path() {
    let c = client("https://vessel.example.com/rest/v1");
    assert_eq!(
      c.table_url("meal_plans").unwrap().as_str(),
      "https://vessel.example.com/rest/v1/meal_plans"
    );
  }

  #[test]
  fn test_plan_insert() {
    let c = client("https://vessel.example.com/rest/v1/");
    let m = Mutation::insert("recipes", json!({"name": "Fish pie"}));
    let plan = c.plan(&m).unwrap();
    assert_eq!(plan.method, Method::POST);
    assert_eq!(plan.body, Some(&json!({"name": "Fish pie"})));
    assert_eq!(plan.url.query(), None);
  }

  #[test]
  fn test_plan_update_filters_by_key() {
    let c = client("https://vessel.example.com/rest/v1/");
    let m = Mutation::update("inventory", "17", json!({"quantity": 3}));
    let plan = c.plan(&m).unwrap();
    assert_eq!(plan.method, Method::PATCH);
    assert_eq!(plan.url.query(), Some("id=eq.17"));
  }

  #[test]
  fn test_plan_delete_without_key_is_rejected() {
    let c = client("https://vessel.example.com/rest/v1/");
    let m = Mutation {
      table: "bookings".to_string(),
      kind: MutationKind::Delete,
      key: None,
      record: serde_json::Value::Null,
    };
    let err = c.plan(&m).unwrap_err();
    assert!(!err.is_transient());
  }

  #[test]
  fn test_select_url() {
    let c = client("https://vessel.example.com/rest/v1");
    let url = c.select(PRICING_TABLE, "name,price").unwrap();
    assert_eq!(url.path(), "/rest/v1/ingredient_prices");
    assert_eq!(url.query(), Some("select=name%2Cprice"));
  }

  #[tokio::test]
  async fn test_unreachable_backend_is_transient() {
    // Port 9 (discard) on localhost is closed in test environments
    let c = client("http://127.0.0.1:9/rest/v1");
    let err = c
      .apply(&Mutation::insert("recipes", json!({})))
      .await
      .unwrap_err();
    assert!(err.is_transient());
    assert!(!c.is_reachable().await);
  }
}
