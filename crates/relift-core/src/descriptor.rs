//! Canonical, explicitly-typed application description.
//!
//! Source platforms describe applications with loosely-typed attribute
//! bags; everything is normalized into [`AppDescriptor`] before it enters
//! the pipeline. Collections use ordered maps so a descriptor serializes
//! identically on every run — prompts built from it are byte-stable, which
//! keeps repeated runs reproducible.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A provisioned add-on (database, cache, queue, ...) attached to an app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addon {
    pub name: String,
    pub plan: String,
}

/// One application to replatform. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppDescriptor {
    pub name: String,
    /// Environment variables (config vars) in deterministic order.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub addons: Vec<Addon>,
    /// Custom domain CNAMEs.
    #[serde(default)]
    pub domains: Vec<String>,
    /// Pipeline stage membership ("staging", "production", ...), when the
    /// source platform couples the app to a delivery pipeline.
    #[serde(default)]
    pub stage: Option<String>,
    /// Whether the source pipeline provisions ephemeral review apps.
    #[serde(default)]
    pub review_apps_enabled: bool,
    /// Estimated recurring cost on the source platform, in USD per month.
    #[serde(default)]
    pub estimated_monthly_cost: f64,
}

impl AppDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            env: BTreeMap::new(),
            addons: Vec::new(),
            domains: Vec::new(),
            stage: None,
            review_apps_enabled: false,
            estimated_monthly_cost: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_is_deterministic() {
        let mut descriptor = AppDescriptor::new("web");
        descriptor.env.insert("ZULU".into(), "1".into());
        descriptor.env.insert("ALPHA".into(), "2".into());
        descriptor.addons.push(Addon {
            name: "heroku-postgresql".into(),
            plan: "standard-0".into(),
        });

        let first = serde_json::to_string(&descriptor).unwrap();
        let second = serde_json::to_string(&descriptor).unwrap();
        assert_eq!(first, second);
        // BTreeMap keys serialize sorted regardless of insertion order.
        assert!(first.find("ALPHA").unwrap() < first.find("ZULU").unwrap());
    }
}
