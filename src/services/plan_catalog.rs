//! Static plan metadata, loaded from `config/plans.toml`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub country_name: Option<String>,
    #[serde(default)]
    pub data_gb: Option<f64>,
    #[serde(default)]
    pub validity_days: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct PlanCatalogFile {
    #[serde(default)]
    plans: Vec<PlanInfo>,
}

#[derive(Debug, Clone, Default)]
pub struct PlanCatalog {
    plans: HashMap<String, PlanInfo>,
}

impl PlanCatalog {
    pub fn from_plans(plans: impl IntoIterator<Item = PlanInfo>) -> Self {
        Self {
            plans: plans.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    /// Load the catalog from `path` (extension optional). A missing file
    /// yields an empty catalog.
    pub fn load(path: &str) -> Result<Self, config::ConfigError> {
        let file: PlanCatalogFile = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .build()?
            .try_deserialize()?;

        if file.plans.is_empty() {
            warn!(path = %path, "plan catalog is empty");
        } else {
            info!(path = %path, plans = file.plans.len(), "plan catalog loaded");
        }
        Ok(Self::from_plans(file.plans))
    }

    pub fn get(&self, plan_id: &str) -> Option<&PlanInfo> {
        self.plans.get(plan_id)
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Display name: redirect `name`, then catalog name, then the plan id.
    pub fn display_name(&self, plan_id: &str, redirect_name: Option<&str>) -> String {
        redirect_name
            .map(str::to_string)
            .or_else(|| self.get(plan_id).map(|p| p.name.clone()))
            .unwrap_or_else(|| plan_id.to_string())
    }

    /// Description sent with the provisioning order.
    pub fn order_description(&self, plan_id: &str, redirect_name: Option<&str>) -> String {
        let name = self.display_name(plan_id, redirect_name);
        match self.get(plan_id).and_then(|p| p.country_name.as_deref()) {
            Some(country) => format!("eSIM order: {} ({})", name, country),
            None => format!("eSIM order: {}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> PlanCatalog {
        PlanCatalog::from_plans([PlanInfo {
            id: "kargi-mobile-7days".to_string(),
            name: "Kargi 7 Days".to_string(),
            country_code: Some("KG".to_string()),
            country_name: Some("Kyrgyzstan".to_string()),
            data_gb: Some(3.0),
            validity_days: Some(7),
        }])
    }

    #[test]
    fn display_name_prefers_redirect_name() {
        let catalog = catalog();
        assert_eq!(
            catalog.display_name("kargi-mobile-7days", Some("Promo")),
            "Promo"
        );
        assert_eq!(
            catalog.display_name("kargi-mobile-7days", None),
            "Kargi 7 Days"
        );
        assert_eq!(catalog.display_name("unknown", None), "unknown");
    }

    #[test]
    fn description_mentions_country_when_known() {
        let catalog = catalog();
        assert_eq!(
            catalog.order_description("kargi-mobile-7days", None),
            "eSIM order: Kargi 7 Days (Kyrgyzstan)"
        );
        assert_eq!(
            catalog.order_description("simpleplan", None),
            "eSIM order: simpleplan"
        );
    }

    #[test]
    fn missing_file_yields_empty_catalog() {
        let catalog = PlanCatalog::load("does/not/exist/plans").unwrap();
        assert!(catalog.is_empty());
    }

    #[test]
    fn bundled_catalog_parses() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/plans");
        let catalog = PlanCatalog::load(path).unwrap();
        assert!(catalog.get("kargi-mobile-7days").is_some());
    }
}
