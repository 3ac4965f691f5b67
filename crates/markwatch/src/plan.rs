//! Plan-tier policy boundary.
//!
//! The orchestrator never interprets tiers itself; it asks a [`PlanPolicy`]
//! for limits and hands the two history integers to the reconciler.

use std::collections::HashMap;

use crate::config::{ClientConfig, PlanConfig};
use crate::history::HistoryLimits;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanLimits {
    pub local_history_cap: usize,
    pub cloud_fetch_limit: usize,
    pub features: HashMap<String, bool>,
}

impl PlanLimits {
    pub fn history_limits(&self) -> HistoryLimits {
        HistoryLimits {
            local_cap: self.local_history_cap,
            cloud_fetch_limit: self.cloud_fetch_limit,
        }
    }

    pub fn has_feature(&self, name: &str) -> bool {
        self.features.get(name).copied().unwrap_or(false)
    }
}

impl From<&PlanConfig> for PlanLimits {
    fn from(plan: &PlanConfig) -> Self {
        Self {
            local_history_cap: plan.local_history_cap,
            cloud_fetch_limit: plan.cloud_fetch_limit,
            features: plan.features.clone(),
        }
    }
}

pub trait PlanPolicy: Send + Sync {
    fn limits(&self, tier: &str) -> PlanLimits;
}

/// Table-driven policy read from the client config. Tier names match
/// case-insensitively.
#[derive(Debug, Clone)]
pub struct StaticPlanPolicy {
    plans: HashMap<String, PlanConfig>,
    default_plan: String,
}

impl StaticPlanPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            plans: config
                .plans
                .iter()
                .map(|(name, plan)| (name.to_lowercase(), plan.clone()))
                .collect(),
            default_plan: config.default_plan.to_lowercase(),
        }
    }
}

impl PlanPolicy for StaticPlanPolicy {
    fn limits(&self, tier: &str) -> PlanLimits {
        let plan = self
            .plans
            .get(&tier.to_lowercase())
            .or_else(|| {
                log::debug!("Unknown plan tier '{}', using '{}'", tier, self.default_plan);
                self.plans.get(&self.default_plan)
            });

        match plan {
            Some(plan) => PlanLimits::from(plan),
            // validate_config guarantees the default plan exists; keep a floor anyway.
            None => PlanLimits {
                local_history_cap: 1,
                cloud_fetch_limit: 0,
                features: HashMap::new(),
            },
        }
    }
}
