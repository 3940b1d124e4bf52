use std::fmt::Write;

use chrono::NaiveDate;
use url::form_urlencoded;

use crate::dashboard::{CategoryPanel, RenderPass, Widget};
use crate::types::{current_quarter, DateInputs, Profile, Tab, DATE_FORMAT};

/// Static inputs of the page that do not change between passes.
pub struct PageContext<'a> {
    pub profile: &'a Profile,
    pub stylesheet: &'a str,
    pub today: NaiveDate,
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Query string that opens `tab` with `inputs` on the next request.
pub fn selection_query(tab: Tab, inputs: &DateInputs) -> String {
    query_serializer(tab, inputs).finish()
}

fn refresh_query(tab: Tab, inputs: &DateInputs) -> String {
    query_serializer(tab, inputs)
        .append_pair("refresh", "1")
        .finish()
}

fn query_serializer(tab: Tab, inputs: &DateInputs) -> form_urlencoded::Serializer<'static, String> {
    let mut query = form_urlencoded::Serializer::new(String::new());
    query
        .append_pair("tab", tab.key())
        .append_pair("start", &inputs.start.format(DATE_FORMAT).to_string())
        .append_pair("end", &inputs.end.format(DATE_FORMAT).to_string())
        .append_pair("total_end", &inputs.total_end.format(DATE_FORMAT).to_string());
    query
}

/// `inputs` holds the dates of both tabs; `pass` was computed for one of them.
pub fn render_page(ctx: &PageContext<'_>, inputs: &DateInputs, pass: &RenderPass) -> String {
    let mut out = String::with_capacity(16 * 1024);
    out.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
    write!(
        out,
        "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n<title>{}</title>\n",
        escape(&ctx.profile.page_title)
    )
    .ok();
    // Injected verbatim.
    write!(out, "<style>{}</style>\n</head>\n<body>\n", ctx.stylesheet).ok();

    append_sidebar(&mut out, ctx.profile);

    out.push_str("<main class=\"content\">\n");
    let active = pass.selection.tab();
    append_tabs(&mut out, inputs, active);
    append_date_form(&mut out, ctx.today, inputs, active);
    for panel in pass.panels() {
        append_panel(&mut out, panel);
    }
    write!(
        out,
        "<footer class=\"pass\">Render pass {}</footer>\n",
        pass.id
    )
    .ok();
    out.push_str("</main>\n</body>\n</html>\n");
    out
}

fn append_sidebar(out: &mut String, profile: &Profile) {
    write!(
        out,
        "<aside class=\"sidebar\">\n<h2>{}</h2>\n<hr>\n<h1>Quarterly Goals</h1>\n<p class=\"objective\">{}</p>\n</aside>\n",
        escape(&profile.sidebar_header),
        escape(&profile.objective)
    )
    .ok();
}

fn append_tabs(out: &mut String, inputs: &DateInputs, active: Tab) {
    out.push_str("<nav class=\"tabs\">\n");
    for tab in [Tab::DateRange, Tab::Total] {
        let class = if tab == active { "tab active" } else { "tab" };
        write!(
            out,
            "<a class=\"{}\" href=\"/?{}\">{}</a>\n",
            class,
            escape(&selection_query(tab, inputs)),
            tab.label()
        )
        .ok();
    }
    out.push_str("</nav>\n");
}

fn append_date_form(out: &mut String, today: NaiveDate, inputs: &DateInputs, active: Tab) {
    out.push_str("<form class=\"dates\" method=\"get\" action=\"/\">\n");
    write!(
        out,
        "<input type=\"hidden\" name=\"tab\" value=\"{}\">\n",
        active.key()
    )
    .ok();
    // The other tab's dates ride along as hidden fields.
    match active {
        Tab::DateRange => {
            append_date_input(out, "Start date:", "start", inputs.start);
            append_date_input(out, "End date:", "end", inputs.end);
            append_hidden_date(out, "total_end", inputs.total_end);
        }
        Tab::Total => {
            append_hidden_date(out, "start", inputs.start);
            append_hidden_date(out, "end", inputs.end);
            append_date_input(out, "End date:", "total_end", inputs.total_end);
        }
    }
    out.push_str("<button type=\"submit\">Apply</button>\n");
    write!(
        out,
        "<a class=\"refresh\" href=\"/?{}\">Refresh</a>\n",
        escape(&refresh_query(active, inputs))
    )
    .ok();
    out.push_str("</form>\n");

    if active == Tab::DateRange {
        let defaults = DateInputs::defaults(today);
        let (quarter_start, quarter_end) = current_quarter(today);
        out.push_str("<div class=\"presets\">\n");
        for (label, start, end) in [
            ("Last 7 days", defaults.start, defaults.end),
            ("This quarter", quarter_start, quarter_end),
        ] {
            let preset = DateInputs {
                start,
                end,
                ..*inputs
            };
            write!(
                out,
                "<a class=\"preset\" href=\"/?{}\">{}</a>\n",
                escape(&selection_query(Tab::DateRange, &preset)),
                label
            )
            .ok();
        }
        out.push_str("</div>\n");
    }
}

fn append_hidden_date(out: &mut String, name: &str, value: NaiveDate) {
    write!(
        out,
        "<input type=\"hidden\" name=\"{}\" value=\"{}\">\n",
        name,
        value.format(DATE_FORMAT)
    )
    .ok();
}

fn append_date_input(out: &mut String, label: &str, name: &str, value: NaiveDate) {
    write!(
        out,
        "<label>{} <input type=\"date\" name=\"{}\" value=\"{}\"></label>\n",
        label,
        name,
        value.format(DATE_FORMAT)
    )
    .ok();
}

fn append_panel(out: &mut String, panel: &CategoryPanel) {
    write!(
        out,
        "<section class=\"category\" data-category=\"{}\">\n",
        panel.category.path_segment()
    )
    .ok();
    if let Some(warning) = &panel.warning {
        write!(
            out,
            "<div class=\"warning\" role=\"status\">{}</div>\n",
            escape(warning)
        )
        .ok();
    }
    for section in &panel.sections {
        write!(out, "<h3>{}</h3>\n", escape(&section.title)).ok();
        if let Some(note) = &section.note {
            write!(out, "<p class=\"note\">{}</p>\n", escape(note)).ok();
        }
        write!(
            out,
            "<div class=\"metrics cols-{}\">\n",
            section.widgets.len()
        )
        .ok();
        for widget in &section.widgets {
            append_widget(out, widget);
        }
        out.push_str("</div>\n");
    }
    out.push_str("</section>\n");
}

fn append_widget(out: &mut String, widget: &Widget) {
    let class = if widget.value.is_some() {
        "metric"
    } else {
        "metric empty"
    };
    out.push_str("<div class=\"");
    out.push_str(class);
    out.push('"');
    if let Some(help) = &widget.help {
        write!(out, " title=\"{}\"", escape(help)).ok();
    }
    write!(
        out,
        ">\n<div class=\"metric-label\">{}</div>\n<div class=\"metric-value\">{}</div>\n</div>\n",
        escape(&widget.label),
        escape(widget.display_value())
    )
    .ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics_client::AnalyticsSource;
    use crate::dashboard::{render_pass, PLACEHOLDER};
    use crate::metrics::MetricsResponse;
    use crate::types::{default_inception, DateRange, MetricCategory, ProfileKind};
    use serde_json::{json, Value};

    struct FixedSource;

    impl AnalyticsSource for FixedSource {
        async fn fetch_analytics(&self, category: MetricCategory, _: DateRange) -> MetricsResponse {
            match category {
                MetricCategory::User => match json!({"users": 120, "referrals": 30}) {
                    Value::Object(map) => MetricsResponse::new(map),
                    _ => unreachable!(),
                },
                _ => MetricsResponse::failed("Could not load <metrics>"),
            }
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn picked_dates() -> DateInputs {
        DateInputs {
            start: date(2024, 1, 1),
            end: date(2024, 1, 7),
            total_end: date(2024, 2, 29),
        }
    }

    async fn page_for(tab: Tab, inputs: DateInputs) -> String {
        let profile = Profile::for_kind(ProfileKind::Stripe);
        let pass = render_pass(&FixedSource, &profile, inputs.selection(tab), default_inception()).await;
        render_page(
            &PageContext {
                profile: &profile,
                stylesheet: ".metric { color: red; }",
                today: date(2024, 3, 10),
            },
            &inputs,
            &pass,
        )
    }

    #[test]
    fn test_escape() {
        assert_eq!(
            escape(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn test_selection_query_carries_both_tabs() {
        assert_eq!(
            selection_query(Tab::DateRange, &picked_dates()),
            "tab=range&start=2024-01-01&end=2024-01-07&total_end=2024-02-29"
        );
        assert_eq!(
            selection_query(Tab::Total, &picked_dates()),
            "tab=total&start=2024-01-01&end=2024-01-07&total_end=2024-02-29"
        );
    }

    #[tokio::test]
    async fn test_page_has_sidebar_tabs_and_metrics() {
        let html = page_for(Tab::DateRange, picked_dates()).await;

        assert!(html.contains("<style>.metric { color: red; }</style>"));
        assert!(html.contains("Pocketed Analytics"));
        assert!(html.contains("Objective: $275K Total Revenue"));
        assert!(html.contains("<a class=\"tab active\" href=\"/?tab=range"));
        assert!(html.contains("name=\"start\" value=\"2024-01-01\""));
        assert!(html.contains("name=\"end\" value=\"2024-01-07\""));
        assert!(html.contains("<div class=\"metric-label\">Users</div>\n<div class=\"metric-value\">120</div>"));
        assert!(html.contains("title=\"Users created within time period\""));
        assert!(html.contains("This quarter"));
    }

    #[tokio::test]
    async fn test_switching_tabs_keeps_the_other_tabs_dates() {
        let both = "start=2024-01-01&amp;end=2024-01-07&amp;total_end=2024-02-29";

        let range_page = page_for(Tab::DateRange, picked_dates()).await;
        assert!(range_page.contains(&format!("<a class=\"tab\" href=\"/?tab=total&amp;{}\">Total</a>", both)));
        assert!(range_page.contains("<input type=\"hidden\" name=\"total_end\" value=\"2024-02-29\">"));
        assert!(range_page.contains(&format!("href=\"/?tab=range&amp;{}&amp;refresh=1\"", both)));
        // Presets replace the range dates only.
        assert!(range_page.contains(
            "href=\"/?tab=range&amp;start=2024-01-01&amp;end=2024-03-31&amp;total_end=2024-02-29\">This quarter"
        ));

        let total_page = page_for(Tab::Total, picked_dates()).await;
        assert!(total_page.contains(&format!(
            "<a class=\"tab\" href=\"/?tab=range&amp;{}\">Date Range</a>",
            both
        )));
        assert!(total_page.contains("<input type=\"hidden\" name=\"start\" value=\"2024-01-01\">"));
        assert!(total_page.contains("<input type=\"hidden\" name=\"end\" value=\"2024-01-07\">"));
        assert!(total_page.contains("name=\"total_end\" value=\"2024-02-29\"></label>"));
    }

    #[tokio::test]
    async fn test_failed_categories_show_warning_and_placeholders() {
        let html = page_for(Tab::Total, picked_dates()).await;

        assert!(html.contains("<div class=\"warning\" role=\"status\">Could not load &lt;metrics&gt;</div>"));
        assert!(html.contains(&format!("<div class=\"metric-value\">{}</div>", PLACEHOLDER)));
        assert!(html.contains("<h3>General Saas Metrics</h3>"));
        assert!(!html.contains("<input type=\"date\" name=\"start\""));
        assert!(!html.contains("This quarter"));
    }
}
