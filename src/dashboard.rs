use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::analytics_client::AnalyticsSource;
use crate::metrics::{
    CategoryWarning, FreeTrialMetrics, MetricValue, MetricsResponse, RevenueMetrics, SaasMetrics,
    UserMetrics,
};
use crate::types::{DateRange, MetricCategory, Profile, ProfileKind, Tab, TabSelection};

/// Shown in place of any value the backend did not send.
pub const PLACEHOLDER: &str = "—";

const REVENUE_NOTE: &str = "All dollar amounts are in CAD and are before tax and after fees.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueFormat {
    Number,
    Percent,
    Currency,
    CurrencyCad,
}

impl ValueFormat {
    fn apply(&self, value: &MetricValue) -> String {
        match self {
            ValueFormat::Number => value.to_string(),
            ValueFormat::Percent => format!("{}%", value),
            ValueFormat::Currency => format!("${}", value),
            ValueFormat::CurrencyCad => format!("${}CAD", value),
        }
    }
}

/// One labelled metric card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Widget {
    pub label: String,
    pub value: Option<String>,
    pub help: Option<String>,
}

impl Widget {
    fn new(label: &str, value: &Option<MetricValue>, format: ValueFormat) -> Self {
        Self {
            label: label.to_string(),
            value: value.as_ref().map(|v| format.apply(v)),
            help: None,
        }
    }

    fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn display_value(&self) -> &str {
        self.value.as_deref().unwrap_or(PLACEHOLDER)
    }
}

impl fmt::Display for Widget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label, self.display_value())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: String,
    pub note: Option<String>,
    pub widgets: Vec<Widget>,
}

impl Section {
    fn new(title: &str, widgets: Vec<Widget>) -> Self {
        Self {
            title: title.to_string(),
            note: None,
            widgets,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryPanel {
    pub category: MetricCategory,
    pub sections: Vec<Section>,
    pub warning: Option<String>,
}

impl CategoryPanel {
    fn new(category: MetricCategory, response: &MetricsResponse, sections: Vec<Section>) -> Self {
        Self {
            category,
            sections,
            warning: response.warning().map(str::to_string),
        }
    }

    pub fn widgets(&self) -> impl Iterator<Item = &Widget> {
        self.sections.iter().flat_map(|s| s.widgets.iter())
    }

    pub fn widget(&self, label: &str) -> Option<&Widget> {
        self.widgets().find(|w| w.label == label)
    }
}

/// Typed metrics of one category plus how they are laid out.
#[derive(Debug, Clone)]
pub struct CategoryView<T> {
    pub metrics: T,
    pub panel: CategoryPanel,
}

fn text_or_placeholder(value: &Option<MetricValue>) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| PLACEHOLDER.to_string())
}

pub async fn display_user_metrics<S: AnalyticsSource>(
    source: &S,
    range: DateRange,
) -> CategoryView<UserMetrics> {
    let response = source.fetch_analytics(MetricCategory::User, range).await;
    let metrics = UserMetrics::from_response(&response);

    let section = Section::new(
        "User Metrics",
        vec![
            Widget::new("Users", &metrics.users, ValueFormat::Number)
                .with_help("Users created within time period"),
            Widget::new(
                "Users with referral code",
                &metrics.referrals,
                ValueFormat::Number,
            )
            .with_help("Users created with referral code within time period"),
        ],
    );

    CategoryView {
        panel: CategoryPanel::new(MetricCategory::User, &response, vec![section]),
        metrics,
    }
}

pub async fn display_free_trial_metrics<S: AnalyticsSource>(
    source: &S,
    range: DateRange,
    profile: &Profile,
) -> CategoryView<FreeTrialMetrics> {
    let response = source.fetch_analytics(MetricCategory::FreeTrial, range).await;
    let metrics = FreeTrialMetrics::from_response(&response, &profile.free_trial_fields);

    let (noun, adjective) = match profile.kind {
        ProfileKind::Stripe => ("Stripe Trial", "a free stripe trial"),
        ProfileKind::Classic => ("Free Trial", "a free trial"),
    };

    let mut sections = vec![Section::new(
        profile.trial_section_title,
        vec![
            Widget::new(
                &format!("{} Starts", noun),
                &metrics.trial_starts,
                ValueFormat::Number,
            )
            .with_help(format!("Users who started {} within time period", adjective)),
            Widget::new(
                &format!("{}s Cancelled", noun),
                &metrics.trial_cancellations,
                ValueFormat::Number,
            )
            .with_help("Users who converted from 'trialing' to 'cancelled' within time period"),
            Widget::new(
                &format!("{}s Converted", noun),
                &metrics.trial_conversions,
                ValueFormat::Number,
            )
            .with_help("Users who converted from 'trialing' to 'active' within time period"),
        ],
    )];

    if profile.has_user_trials() {
        sections.push(Section::new(
            "Free Trial Metrics",
            vec![
                Widget::new(
                    "User Trial Starts",
                    &metrics.user_trial_starts,
                    ValueFormat::Number,
                )
                .with_help("Users who activated their free trial within time period"),
                Widget::new(
                    "User Trials with Login",
                    &metrics.user_trials_with_login,
                    ValueFormat::Number,
                )
                .with_help("Users who activated trial and have seen the popup at least once"),
                Widget::new(
                    "User Trials ended",
                    &metrics.user_trials_ended,
                    ValueFormat::Number,
                )
                .with_help("Trialing users whose trials have ended this period"),
                Widget::new(
                    "User Trials Converted",
                    &metrics.user_trials_converted,
                    ValueFormat::Number,
                )
                .with_help("Users who converted from 'trialing' to 'active' within time period"),
            ],
        ));
    }

    CategoryView {
        panel: CategoryPanel::new(MetricCategory::FreeTrial, &response, sections),
        metrics,
    }
}

pub async fn display_saas_metrics<S: AnalyticsSource>(
    source: &S,
    range: DateRange,
) -> CategoryView<SaasMetrics> {
    let response = source.fetch_analytics(MetricCategory::Saas, range).await;
    let metrics = SaasMetrics::from_response(&response);

    let general = Section::new(
        "General Saas Metrics",
        vec![
            Widget::new(
                "Total Active Subscriptions",
                &metrics.total_active_subscriptions,
                ValueFormat::Number,
            )
            .with_help("Basic subscriptions + Plus subscriptions + Concierge Subscriptions"),
            Widget::new(
                "New User Conversion",
                &metrics.new_user_conversion,
                ValueFormat::Percent,
            )
            .with_help("Total Active Subscriptions / Users"),
            Widget::new("Churn", &metrics.churn, ValueFormat::Percent)
                .with_help("Non-trial Cancellations / Total Active Subscriptions"),
            Widget::new("Cancellations", &metrics.cancellations, ValueFormat::Number)
                .with_help("Non-trial cancellations (cancelled OR set to cancel)"),
        ],
    );
    let active = Section::new(
        "Active Subscriptions",
        vec![
            Widget::new(
                "Basic Subscriptions",
                &metrics.basic_subscriptions,
                ValueFormat::Number,
            )
            .with_help(format!(
                "New Basic Subscriptions, made up of {} trial conversions, and {} non-trial conversions",
                text_or_placeholder(&metrics.basic_subs_trial),
                text_or_placeholder(&metrics.basic_subs_non_trial)
            )),
            Widget::new(
                "Pocketed+ Subscriptions",
                &metrics.pplus_subscriptions,
                ValueFormat::Number,
            ),
            Widget::new(
                "Concierge Subscriptions",
                &metrics.concierge_subscriptions,
                ValueFormat::Number,
            ),
        ],
    );

    CategoryView {
        panel: CategoryPanel::new(MetricCategory::Saas, &response, vec![general, active]),
        metrics,
    }
}

pub async fn display_revenue_metrics<S: AnalyticsSource>(
    source: &S,
    range: DateRange,
    profile: &Profile,
) -> CategoryView<RevenueMetrics> {
    let response = source.fetch_analytics(MetricCategory::Revenue, range).await;
    let metrics = RevenueMetrics::from_response(&response);

    let mut widgets = vec![
        Widget::new("SaaS Revenue", &metrics.saas, ValueFormat::Currency),
        Widget::new("Refunds", &metrics.refunds, ValueFormat::CurrencyCad).with_help(format!(
            "{} refunds this period",
            text_or_placeholder(&metrics.refunds_count)
        )),
    ];
    if profile.revenue_breakdown {
        widgets.push(Widget::new(
            "Service Revenue",
            &metrics.service,
            ValueFormat::Currency,
        ));
        widgets.push(
            Widget::new("Total Revenue", &metrics.total, ValueFormat::Currency)
                .with_help("SaaS revenue + service revenue"),
        );
    }

    let mut section = Section::new("Analytics", widgets);
    section.note = Some(REVENUE_NOTE.to_string());

    CategoryView {
        panel: CategoryPanel::new(MetricCategory::Revenue, &response, vec![section]),
        metrics,
    }
}

/// Result of one full pass over the four categories.
#[derive(Debug, Clone)]
pub struct RenderPass {
    pub id: Uuid,
    pub selection: TabSelection,
    pub range: DateRange,
    pub user: CategoryView<UserMetrics>,
    pub free_trial: CategoryView<FreeTrialMetrics>,
    pub saas: CategoryView<SaasMetrics>,
    pub revenue: CategoryView<RevenueMetrics>,
}

impl RenderPass {
    pub fn panels(&self) -> [&CategoryPanel; 4] {
        [
            &self.user.panel,
            &self.free_trial.panel,
            &self.saas.panel,
            &self.revenue.panel,
        ]
    }

    pub fn warnings(&self) -> Vec<CategoryWarning> {
        self.panels()
            .iter()
            .filter_map(|panel| {
                panel.warning.as_ref().map(|message| CategoryWarning {
                    category: panel.category,
                    message: message.clone(),
                })
            })
            .collect()
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        DashboardSnapshot {
            pass_id: self.id.to_string(),
            tab: self.selection.tab(),
            start: self.range.start,
            end: self.range.end,
            selected_end: self.range.selected_end(),
            user: self.user.metrics.clone(),
            free_trial: self.free_trial.metrics.clone(),
            saas: self.saas.metrics.clone(),
            revenue: self.revenue.metrics.clone(),
            warnings: self.warnings(),
        }
    }
}

/// JSON view of a render pass. `end` is the exclusive bound sent upstream.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub pass_id: String,
    pub tab: Tab,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub selected_end: NaiveDate,
    pub user: UserMetrics,
    pub free_trial: FreeTrialMetrics,
    pub saas: SaasMetrics,
    pub revenue: RevenueMetrics,
    pub warnings: Vec<CategoryWarning>,
}

/// Fetches and lays out all categories, one at a time, in render order.
pub async fn render_pass<S: AnalyticsSource>(
    source: &S,
    profile: &Profile,
    selection: TabSelection,
    inception: NaiveDate,
) -> RenderPass {
    let id = Uuid::new_v4();
    let range = selection.effective_range(inception);
    log::info!(
        "[Dashboard] Render pass {} on {} tab: {}..{}",
        id,
        selection.tab().label(),
        range.start,
        range.end
    );

    let user = display_user_metrics(source, range).await;
    let free_trial = display_free_trial_metrics(source, range, profile).await;
    let saas = display_saas_metrics(source, range).await;
    let revenue = display_revenue_metrics(source, range, profile).await;

    let pass = RenderPass {
        id,
        selection,
        range,
        user,
        free_trial,
        saas,
        revenue,
    };
    for warning in pass.warnings() {
        log::warn!(
            "[Dashboard] Render pass {}: {} shown with placeholders ({})",
            id,
            warning.category.path_segment(),
            warning.message
        );
    }
    pass
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{default_inception, DateInputs};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Replays canned payloads and records every call it receives.
    #[derive(Default)]
    struct ScriptedSource {
        payloads: HashMap<MetricCategory, Value>,
        calls: Mutex<Vec<(MetricCategory, DateRange)>>,
    }

    impl ScriptedSource {
        fn with(mut self, category: MetricCategory, payload: Value) -> Self {
            self.payloads.insert(category, payload);
            self
        }

        fn calls(&self) -> Vec<(MetricCategory, DateRange)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl AnalyticsSource for ScriptedSource {
        async fn fetch_analytics(&self, category: MetricCategory, range: DateRange) -> MetricsResponse {
            self.calls.lock().unwrap().push((category, range));
            match self.payloads.get(&category) {
                Some(Value::Object(map)) => MetricsResponse::new(map.clone()),
                _ => MetricsResponse::failed(format!("{} unreachable", category.path_segment())),
            }
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn stripe() -> Profile {
        Profile::for_kind(ProfileKind::Stripe)
    }

    #[tokio::test]
    async fn test_pass_calls_each_category_once_in_order() {
        let source = ScriptedSource::default();
        let selection = TabSelection::DateRange {
            start: date(2024, 1, 1),
            end: date(2024, 1, 7),
        };
        render_pass(&source, &stripe(), selection, default_inception()).await;

        let calls = source.calls();
        let categories: Vec<MetricCategory> = calls.iter().map(|(c, _)| *c).collect();
        assert_eq!(categories, MetricCategory::all().to_vec());
        for (_, range) in calls {
            assert_eq!(range.start, date(2024, 1, 1));
            assert_eq!(range.end, date(2024, 1, 8));
        }
    }

    #[tokio::test]
    async fn test_user_widgets_show_backend_values() {
        let source =
            ScriptedSource::default().with(MetricCategory::User, json!({"users": 120, "referrals": 30}));
        let view = display_user_metrics(&source, DateRange::inclusive(date(2024, 1, 1), date(2024, 1, 7))).await;

        let rendered: Vec<String> = view.panel.widgets().map(|w| w.to_string()).collect();
        assert_eq!(rendered, vec!["Users: 120", "Users with referral code: 30"]);
        assert!(view.panel.warning.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_revenue_does_not_affect_other_categories() {
        let source = ScriptedSource::default()
            .with(MetricCategory::User, json!({"users": 5, "referrals": 1}))
            .with(MetricCategory::FreeTrial, json!({"free_trial_starts": 3}))
            .with(MetricCategory::Saas, json!({"churn": 4, "new_user_conversion": 42}));
        let pass = render_pass(
            &source,
            &stripe(),
            DateInputs::defaults(date(2024, 3, 10)).selection(Tab::DateRange),
            default_inception(),
        )
        .await;

        assert_eq!(pass.user.panel.widget("Users").unwrap().display_value(), "5");
        assert_eq!(
            pass.saas.panel.widget("New User Conversion").unwrap().display_value(),
            "42%"
        );
        assert!(pass.revenue.panel.warning.is_some());
        for widget in pass.revenue.panel.widgets() {
            assert_eq!(widget.display_value(), PLACEHOLDER);
        }
        let warnings = pass.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].category, MetricCategory::Revenue);
    }

    #[tokio::test]
    async fn test_missing_fields_render_placeholder_without_suffix() {
        let source = ScriptedSource::default().with(MetricCategory::Saas, json!({"churn": 2.5}));
        let view = display_saas_metrics(&source, DateRange::inclusive(date(2024, 1, 1), date(2024, 1, 1))).await;

        assert_eq!(view.panel.widget("Churn").unwrap().display_value(), "2.5%");
        assert_eq!(
            view.panel.widget("New User Conversion").unwrap().display_value(),
            PLACEHOLDER
        );
        let basic = view.panel.widget("Basic Subscriptions").unwrap();
        assert_eq!(
            basic.help.as_deref(),
            Some("New Basic Subscriptions, made up of — trial conversions, and — non-trial conversions")
        );
        assert!(view.metrics.basic_subscriptions.is_none());
    }

    #[tokio::test]
    async fn test_total_tab_ignores_range_start() {
        let source = ScriptedSource::default();
        let pass = render_pass(
            &source,
            &stripe(),
            TabSelection::Total {
                end: date(2024, 6, 30),
            },
            default_inception(),
        )
        .await;
        assert_eq!(pass.range.start, date(2020, 1, 1));
        assert!(source
            .calls()
            .iter()
            .all(|(_, range)| range.start == date(2020, 1, 1) && range.end == date(2024, 7, 1)));
    }

    #[tokio::test]
    async fn test_revenue_formats_and_classic_breakdown() {
        let source = ScriptedSource::default().with(
            MetricCategory::Revenue,
            json!({"saas": "1200.50", "refunds": 30, "refunds_count": 2, "service": 400, "total": 1600.5}),
        );
        let range = DateRange::inclusive(date(2024, 1, 1), date(2024, 1, 31));

        let stripe_view = display_revenue_metrics(&source, range, &stripe()).await;
        assert_eq!(stripe_view.panel.sections[0].title, "Analytics");
        assert_eq!(stripe_view.panel.widgets().count(), 2);
        let refunds = stripe_view.panel.widget("Refunds").unwrap();
        assert_eq!(refunds.display_value(), "$30CAD");
        assert_eq!(refunds.help.as_deref(), Some("2 refunds this period"));

        let classic_view =
            display_revenue_metrics(&source, range, &Profile::for_kind(ProfileKind::Classic)).await;
        assert_eq!(
            classic_view.panel.widget("SaaS Revenue").unwrap().display_value(),
            "$1200.50"
        );
        assert_eq!(
            classic_view.panel.widget("Total Revenue").unwrap().display_value(),
            "$1600.5"
        );
    }

    #[tokio::test]
    async fn test_free_trial_sections_follow_profile() {
        let source = ScriptedSource::default().with(
            MetricCategory::FreeTrial,
            json!({"free_trials": 8, "free_trial_conversions": 2, "user_trials": 11}),
        );
        let range = DateRange::inclusive(date(2024, 1, 1), date(2024, 1, 7));

        let stripe_view = display_free_trial_metrics(&source, range, &stripe()).await;
        assert_eq!(stripe_view.panel.sections.len(), 2);
        assert_eq!(
            stripe_view.panel.widget("User Trial Starts").unwrap().display_value(),
            "11"
        );

        let classic_view =
            display_free_trial_metrics(&source, range, &Profile::for_kind(ProfileKind::Classic))
                .await;
        assert_eq!(classic_view.panel.sections.len(), 1);
        assert_eq!(
            classic_view.panel.widget("Free Trial Starts").unwrap().display_value(),
            "8"
        );
        assert_eq!(
            classic_view.panel.widget("Free Trials Cancelled").unwrap().display_value(),
            PLACEHOLDER
        );
    }

    #[tokio::test]
    async fn test_snapshot_reports_effective_and_selected_end() {
        let source = ScriptedSource::default().with(MetricCategory::User, json!({"users": 1}));
        let pass = render_pass(
            &source,
            &stripe(),
            TabSelection::DateRange {
                start: date(2024, 1, 1),
                end: date(2024, 1, 7),
            },
            default_inception(),
        )
        .await;
        let json = serde_json::to_value(pass.snapshot()).unwrap();
        assert_eq!(json["tab"], "date-range");
        assert_eq!(json["end"], "2024-01-08");
        assert_eq!(json["selected_end"], "2024-01-07");
        assert_eq!(json["user"]["users"], 1);
        assert_eq!(json["user"]["referrals"], Value::Null);
        assert_eq!(json["warnings"].as_array().unwrap().len(), 3);
    }
}
