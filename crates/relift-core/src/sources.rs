//! Source platform providers.
//!
//! A provider enumerates the applications to migrate and normalizes each
//! one into a typed [`AppDescriptor`]. The pipeline never talks to a source
//! platform directly; it receives already-populated descriptors.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{Datelike, TimeZone, Utc};
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::warn;

use crate::descriptor::{Addon, AppDescriptor};
use crate::error::{ReliftError, Result};

/// Enumerates and normalizes the applications of one source platform.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<AppDescriptor>>;
}

const HEROKU_API_ROOT: &str = "https://api.heroku.com";

/// Heroku implementation: walks the platform API (apps, config-vars,
/// addons, domains, formation, pipeline couplings) and prorates dyno
/// pricing over the elapsed billing period for the cost estimate.
pub struct HerokuSource {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl HerokuSource {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: HEROKU_API_ROOT.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// GET a platform API path. "not found" responses normalize to `null`
    /// so absent sub-resources read as empty collections downstream.
    async fn get(&self, path: &str) -> Result<Value> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "application/vnd.heroku+json; version=3")
            .send()
            .await
            .map_err(|e| ReliftError::Source(format!("request to {path} failed: {e}")))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| ReliftError::Source(format!("decoding {path}: {e}")))?;

        if !status.is_success() {
            if body.get("id").and_then(Value::as_str) == Some("not_found") {
                return Ok(Value::Null);
            }
            return Err(ReliftError::Source(format!(
                "unexpected status {status} from {path}: {body}"
            )));
        }

        Ok(body)
    }

    async fn fetch_one(&self, app_name: &str) -> Result<AppDescriptor> {
        let mut descriptor = AppDescriptor::new(app_name);

        let config = self.get(&format!("/apps/{app_name}/config-vars")).await?;
        if let Some(map) = config.as_object() {
            descriptor.env = map
                .iter()
                .map(|(k, v)| {
                    let value = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), value)
                })
                .collect::<BTreeMap<_, _>>();
        }

        let addons = self.get(&format!("/apps/{app_name}/addons")).await?;
        for addon in addons.as_array().into_iter().flatten() {
            descriptor.addons.push(Addon {
                name: string_at(addon, &["addon_service", "name"])
                    .or_else(|| string_at(addon, &["name"]))
                    .unwrap_or_default(),
                plan: string_at(addon, &["plan", "name"]).unwrap_or_default(),
            });
        }

        let domains = self.get(&format!("/apps/{app_name}/domains")).await?;
        descriptor.domains = domains
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|d| string_at(d, &["cname"]).or_else(|| string_at(d, &["hostname"])))
            .collect();

        let formation = self.get(&format!("/apps/{app_name}/formation")).await?;
        descriptor.estimated_monthly_cost = estimate_formation_cost(&formation, Utc::now());

        let coupling = self
            .get(&format!("/apps/{app_name}/pipeline-couplings"))
            .await?;
        let coupling = match &coupling {
            Value::Array(items) => items.first(),
            Value::Object(_) => Some(&coupling),
            _ => None,
        };
        if let Some(coupling) = coupling {
            descriptor.stage = string_at(coupling, &["stage"]);
            if let Some(pipeline_id) = string_at(coupling, &["pipeline", "id"]) {
                let review_conf = self
                    .get(&format!("/pipelines/{pipeline_id}/review-app-config"))
                    .await
                    .unwrap_or(Value::Null);
                descriptor.review_apps_enabled = !review_conf.is_null();
            }
        }

        Ok(descriptor)
    }
}

#[async_trait]
impl SourceProvider for HerokuSource {
    async fn fetch_all(&self) -> Result<Vec<AppDescriptor>> {
        let apps = self.get("/apps").await?;
        let names: Vec<String> = apps
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|app| string_at(app, &["name"]))
            .collect();

        // Detail fetches fan out per app; results are slotted by index so
        // completion order cannot reshuffle them.
        let mut tasks: JoinSet<(usize, Result<AppDescriptor>)> = JoinSet::new();
        for (index, name) in names.iter().enumerate() {
            let this = self.clone_for_task();
            let name = name.clone();
            tasks.spawn(async move { (index, this.fetch_one(&name).await) });
        }

        let mut slots: Vec<Option<AppDescriptor>> = vec![None; names.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, result) =
                joined.map_err(|e| ReliftError::Source(format!("fetch task panicked: {e}")))?;
            match result {
                Ok(descriptor) => slots[index] = Some(descriptor),
                // One unreadable app must not sink the whole enumeration.
                Err(e) => warn!(app = %names[index], "skipping app: {e}"),
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }
}

impl HerokuSource {
    fn clone_for_task(&self) -> Self {
        Self {
            http: self.http.clone(),
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
        }
    }
}

/// Prorate dyno pricing over the elapsed portion of the current month.
/// Formation entries carry a monthly price in cents and a quantity.
fn estimate_formation_cost(formation: &Value, now: chrono::DateTime<Utc>) -> f64 {
    let start_of_period = Utc
        .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now);
    let days_elapsed = (now - start_of_period).num_hours() as f64 / 24.0;

    let mut total = 0.0;
    for entry in formation.as_array().into_iter().flatten() {
        let quantity = entry
            .get("quantity")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let cents = entry
            .pointer("/size/price/cents")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let daily = (cents / 100.0) * quantity / 30.0;
        total += daily * days_elapsed;
    }
    total
}

fn string_at(value: &Value, path: &[&str]) -> Option<String> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    current.as_str().map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn formation_cost_prorates_by_elapsed_days() {
        let formation = json!([
            {"quantity": 2.0, "size": {"price": {"cents": 2500}}},
            {"quantity": 1.0, "size": {"price": {"cents": 0}}}
        ]);
        // 16th of the month: 15 elapsed days.
        let now = Utc.with_ymd_and_hms(2025, 3, 16, 0, 0, 0).single().unwrap();
        let cost = estimate_formation_cost(&formation, now);
        // 2 dynos at $25/month: daily 50/30, times 15 days = $25.
        assert!((cost - 25.0).abs() < 1e-9);
    }

    #[test]
    fn string_at_walks_nested_objects() {
        let value = json!({"plan": {"name": "standard-0"}});
        assert_eq!(
            string_at(&value, &["plan", "name"]).as_deref(),
            Some("standard-0")
        );
        assert_eq!(string_at(&value, &["plan", "missing"]), None);
    }

    #[test]
    fn empty_formation_costs_nothing() {
        let now = Utc.with_ymd_and_hms(2025, 3, 16, 0, 0, 0).single().unwrap();
        assert_eq!(estimate_formation_cost(&Value::Null, now), 0.0);
    }
}
