use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetricCategory {
    User,
    FreeTrial,
    Saas,
    Revenue,
}

impl MetricCategory {
    /// Path segment under `/analytics/` on the backend.
    pub fn path_segment(&self) -> &'static str {
        match self {
            MetricCategory::User => "user",
            MetricCategory::FreeTrial => "freetrial",
            MetricCategory::Saas => "saas",
            MetricCategory::Revenue => "revenue",
        }
    }

    /// Render order of a pass.
    pub fn all() -> &'static [MetricCategory] {
        &[
            MetricCategory::User,
            MetricCategory::FreeTrial,
            MetricCategory::Saas,
            MetricCategory::Revenue,
        ]
    }
}

/// Query window sent to the backend. `end` is exclusive: it is already one
/// day past the date the user picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Builds the query window for a user-selected, inclusive end date.
    pub fn inclusive(start: NaiveDate, selected_end: NaiveDate) -> Self {
        Self {
            start,
            end: selected_end
                .checked_add_days(Days::new(1))
                .unwrap_or(selected_end),
        }
    }

    /// The end date as the user selected it.
    pub fn selected_end(&self) -> NaiveDate {
        self.end.pred_opt().unwrap_or(self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tab {
    DateRange,
    Total,
}

impl Tab {
    pub fn key(&self) -> &'static str {
        match self {
            Tab::DateRange => "range",
            Tab::Total => "total",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Tab::DateRange => "Date Range",
            Tab::Total => "Total",
        }
    }

    pub fn from_input(input: &str) -> Option<Self> {
        match input.to_ascii_lowercase().as_str() {
            "range" | "date-range" | "date_range" | "since" => Some(Tab::DateRange),
            "total" | "all" | "all-time" => Some(Tab::Total),
            _ => None,
        }
    }
}

/// What the user picked on one of the two tabs. Dates are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabSelection {
    DateRange { start: NaiveDate, end: NaiveDate },
    Total { end: NaiveDate },
}

impl TabSelection {
    pub fn tab(&self) -> Tab {
        match self {
            TabSelection::DateRange { .. } => Tab::DateRange,
            TabSelection::Total { .. } => Tab::Total,
        }
    }

    /// Effective query window. The Total tab always starts at `inception`.
    pub fn effective_range(&self, inception: NaiveDate) -> DateRange {
        match *self {
            TabSelection::DateRange { start, end } => DateRange::inclusive(start, end),
            TabSelection::Total { end } => DateRange::inclusive(inception, end),
        }
    }
}

/// Dates picked on both tabs. Every link and form on the page carries all
/// three, so switching tabs keeps what was picked on the other one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateInputs {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub total_end: NaiveDate,
}

impl DateInputs {
    /// "Last week" through "yesterday" on the range tab, "yesterday" on Total.
    pub fn defaults(today: NaiveDate) -> Self {
        Self {
            start: days_before(today, 7),
            end: days_before(today, 1),
            total_end: days_before(today, 1),
        }
    }

    pub fn selection(&self, tab: Tab) -> TabSelection {
        match tab {
            Tab::DateRange => TabSelection::DateRange {
                start: self.start,
                end: self.end,
            },
            Tab::Total => TabSelection::Total {
                end: self.total_end,
            },
        }
    }
}

pub fn days_before(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_sub_days(Days::new(days)).unwrap_or(date)
}

/// First and last day of the calendar quarter containing `today`.
pub fn current_quarter(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let quarter = (today.month0() / 3) as i32;
    let first_month = (quarter * 3 + 1) as u32;
    let start = NaiveDate::from_ymd_opt(today.year(), first_month, 1).unwrap_or(today);
    let next_start = if quarter == 3 {
        NaiveDate::from_ymd_opt(today.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(today.year(), first_month + 3, 1)
    };
    let last = next_start
        .and_then(|d| d.pred_opt())
        .unwrap_or(today);
    (start, last)
}

pub fn default_inception() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or(NaiveDate::MIN)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProfileKind {
    /// Stripe trials plus in-app user trials, sent with the shared secret.
    #[default]
    Stripe,
    /// Plain free-trial funnel with the service/total revenue breakdown.
    Classic,
}

/// Backend field names for the free-trial category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeTrialFields {
    pub trial_starts: &'static str,
    pub trial_cancellations: &'static str,
    pub trial_conversions: &'static str,
    pub user_trial_starts: Option<&'static str>,
    pub user_trials_with_login: Option<&'static str>,
    pub user_trials_ended: Option<&'static str>,
    pub user_trials_converted: Option<&'static str>,
}

/// Everything that differs between dashboard deployments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub kind: ProfileKind,
    pub page_title: String,
    pub sidebar_header: String,
    pub objective: String,
    pub trial_section_title: &'static str,
    pub free_trial_fields: FreeTrialFields,
    pub revenue_breakdown: bool,
}

impl Profile {
    pub fn for_kind(kind: ProfileKind) -> Self {
        match kind {
            ProfileKind::Stripe => Self {
                kind,
                page_title: "Pocketed Metrics Dashboard".to_string(),
                sidebar_header: "Pocketed Analytics".to_string(),
                objective: "Objective: $275K Total Revenue".to_string(),
                trial_section_title: "STRIPE Trial Metrics",
                free_trial_fields: FreeTrialFields {
                    trial_starts: "free_trial_starts",
                    trial_cancellations: "stripe_trial_cancellations",
                    trial_conversions: "stripe_trial_conversions",
                    user_trial_starts: Some("user_trials"),
                    user_trials_with_login: Some("user_trials_popup_seen"),
                    user_trials_ended: Some("user_trials_ended"),
                    user_trials_converted: Some("user_trial_conversion_count"),
                },
                revenue_breakdown: false,
            },
            ProfileKind::Classic => Self {
                kind,
                page_title: "Pocketed Metrics Dashboard".to_string(),
                sidebar_header: "Pocketed Analytics".to_string(),
                objective: "Objective: Grow Total Active Subscriptions".to_string(),
                trial_section_title: "Free Trial Metrics",
                free_trial_fields: FreeTrialFields {
                    trial_starts: "free_trials",
                    trial_cancellations: "free_trial_cancellations",
                    trial_conversions: "free_trial_conversions",
                    user_trial_starts: None,
                    user_trials_with_login: None,
                    user_trials_ended: None,
                    user_trials_converted: None,
                },
                revenue_breakdown: true,
            },
        }
    }

    pub fn has_user_trials(&self) -> bool {
        self.free_trial_fields.user_trial_starts.is_some()
    }
}
