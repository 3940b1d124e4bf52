use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

use crate::types::{FreeTrialFields, MetricCategory};

/// Raw field mapping for one category. Empty when the fetch failed, in
/// which case `warning` says why.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsResponse {
    fields: Map<String, Value>,
    warning: Option<String>,
}

impl MetricsResponse {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            warning: None,
        }
    }

    pub fn failed(warning: impl Into<String>) -> Self {
        Self {
            fields: Map::new(),
            warning: Some(warning.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn is_failure(&self) -> bool {
        self.warning.is_some()
    }

    pub fn warning(&self) -> Option<&str> {
        self.warning.as_deref()
    }

    /// Reads a field by name. Missing keys and JSON `null` are both absent.
    pub fn field(&self, name: &str) -> Option<MetricValue> {
        match self.fields.get(name) {
            None | Some(Value::Null) => None,
            Some(value) => Some(MetricValue(value.clone())),
        }
    }

    fn optional_field(&self, name: Option<&str>) -> Option<MetricValue> {
        name.and_then(|n| self.field(n))
    }
}

/// A value exactly as the backend sent it. No coercion happens here.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricValue(Value);

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            other => write!(f, "{}", other),
        }
    }
}

impl Serialize for MetricValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl From<Value> for MetricValue {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserMetrics {
    pub users: Option<MetricValue>,
    pub referrals: Option<MetricValue>,
}

impl UserMetrics {
    pub fn from_response(response: &MetricsResponse) -> Self {
        Self {
            users: response.field("users"),
            referrals: response.field("referrals"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FreeTrialMetrics {
    pub trial_starts: Option<MetricValue>,
    pub trial_cancellations: Option<MetricValue>,
    pub trial_conversions: Option<MetricValue>,
    pub user_trial_starts: Option<MetricValue>,
    pub user_trials_with_login: Option<MetricValue>,
    pub user_trials_ended: Option<MetricValue>,
    pub user_trials_converted: Option<MetricValue>,
}

impl FreeTrialMetrics {
    pub fn from_response(response: &MetricsResponse, names: &FreeTrialFields) -> Self {
        Self {
            trial_starts: response.field(names.trial_starts),
            trial_cancellations: response.field(names.trial_cancellations),
            trial_conversions: response.field(names.trial_conversions),
            user_trial_starts: response.optional_field(names.user_trial_starts),
            user_trials_with_login: response.optional_field(names.user_trials_with_login),
            user_trials_ended: response.optional_field(names.user_trials_ended),
            user_trials_converted: response.optional_field(names.user_trials_converted),
        }
    }
}

/// Percent fields arrive pre-multiplied (`42` means 42%).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SaasMetrics {
    pub basic_subscriptions: Option<MetricValue>,
    pub basic_subs_non_trial: Option<MetricValue>,
    pub basic_subs_trial: Option<MetricValue>,
    pub pplus_subscriptions: Option<MetricValue>,
    pub concierge_subscriptions: Option<MetricValue>,
    pub total_active_subscriptions: Option<MetricValue>,
    pub new_user_conversion: Option<MetricValue>,
    pub churn: Option<MetricValue>,
    pub cancellations: Option<MetricValue>,
}

impl SaasMetrics {
    pub fn from_response(response: &MetricsResponse) -> Self {
        Self {
            basic_subscriptions: response.field("basic_subscriptions"),
            basic_subs_non_trial: response.field("basic_subs_non_trial"),
            basic_subs_trial: response.field("basic_subs_trial"),
            pplus_subscriptions: response.field("pplus_subscriptions"),
            concierge_subscriptions: response.field("concierge_subscriptions"),
            total_active_subscriptions: response.field("total_active_subscriptions"),
            new_user_conversion: response.field("new_user_conversion"),
            churn: response.field("churn"),
            cancellations: response.field("cancellations"),
        }
    }
}

/// Amounts in CAD, before tax and after fees.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RevenueMetrics {
    pub saas: Option<MetricValue>,
    pub refunds: Option<MetricValue>,
    pub refunds_count: Option<MetricValue>,
    pub service: Option<MetricValue>,
    pub total: Option<MetricValue>,
}

impl RevenueMetrics {
    pub fn from_response(response: &MetricsResponse) -> Self {
        Self {
            saas: response.field("saas"),
            refunds: response.field("refunds"),
            refunds_count: response.field("refunds_count"),
            service: response.field("service"),
            total: response.field("total"),
        }
    }
}

/// Per-category outcome carried into the JSON snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryWarning {
    pub category: MetricCategory,
    pub message: String,
}
