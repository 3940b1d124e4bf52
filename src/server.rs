use bytes::Bytes;
use chrono::{Days, Local, NaiveDate};
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use url::form_urlencoded;

use crate::analytics_client::AnalyticsClient;
use crate::cache::CachedSource;
use crate::dashboard::{render_pass, RenderPass};
use crate::errors::{DashboardError, DashboardResult};
use crate::html::{render_page, PageContext};
use crate::types::{DateInputs, Profile, Tab, DATE_FORMAT};

/// Everything a request handler needs, shared across connections.
pub struct DashboardState {
    pub source: CachedSource<AnalyticsClient>,
    pub profile: Profile,
    pub stylesheet: String,
    pub inception: NaiveDate,
}

pub struct DashboardServer {
    pub listen_addr: String,
    state: Arc<DashboardState>,
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    serve_task: Option<tokio::task::JoinHandle<()>>,
    pub is_running: bool,
}

impl DashboardServer {
    pub fn new(listen_addr: impl Into<String>, state: Arc<DashboardState>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            state,
            local_addr: None,
            shutdown_tx: None,
            serve_task: None,
            is_running: false,
        }
    }

    /// Binds and starts accepting. Returns the bound address, which differs
    /// from `listen_addr` when port 0 was requested.
    pub async fn start(&mut self) -> DashboardResult<SocketAddr> {
        if let (true, Some(addr)) = (self.is_running, self.local_addr) {
            log::info!("[DashboardServer] Already running");
            return Ok(addr);
        }

        let listener = TcpListener::bind(&self.listen_addr)
            .await
            .map_err(|e| DashboardError::Bind(format!("{}: {}", self.listen_addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| DashboardError::Bind(format!("{}: {}", self.listen_addr, e)))?;
        log::info!("[DashboardServer] Listening on http://{}", local_addr);

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        self.shutdown_tx = Some(shutdown_tx);
        self.local_addr = Some(local_addr);
        self.is_running = true;

        let state = self.state.clone();
        let serve_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _addr)) => {
                                let io = TokioIo::new(stream);
                                let state = state.clone();
                                tokio::spawn(async move {
                                    let svc = service_fn(move |req| {
                                        let state = state.clone();
                                        async move { handle_request(req, state).await }
                                    });
                                    if let Err(e) = http1::Builder::new()
                                        .serve_connection(io, svc)
                                        .await
                                    {
                                        log::error!("[DashboardServer] Connection error: {}", e);
                                    }
                                });
                            }
                            Err(e) => {
                                log::error!("[DashboardServer] Accept error: {}", e);
                            }
                        }
                    }
                    _ = &mut shutdown_rx => {
                        log::info!("[DashboardServer] Shutdown signal received");
                        break;
                    }
                }
            }
        });
        self.serve_task = Some(serve_task);

        Ok(local_addr)
    }

    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.serve_task.take() {
            match tokio::time::timeout(Duration::from_secs(2), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log::warn!("[DashboardServer] Serve task join error: {}", e);
                }
                Err(_) => {
                    log::warn!("[DashboardServer] Timed out waiting for serve task to stop");
                }
            }
        }
        self.is_running = false;
        self.local_addr = None;
        log::info!("[DashboardServer] Stopped");
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

fn make_response(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    if let Ok(value) = hyper::header::HeaderValue::from_str(content_type) {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, value);
    }
    response
        .headers_mut()
        .insert(hyper::header::CACHE_CONTROL, hyper::header::HeaderValue::from_static("no-store"));
    response
}

fn make_text(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    make_response(status, "text/plain; charset=utf-8", body.to_string())
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<DashboardState>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or("").to_string();

    log::debug!("[DashboardServer] Incoming request: {} {}", method, path);

    if method != Method::GET {
        return Ok(make_text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed"));
    }

    let response = match path.as_str() {
        "/healthz" => make_text(StatusCode::OK, "ok"),
        "/" => match run_pass(&state, &query).await {
            Ok((inputs, pass)) => {
                let ctx = PageContext {
                    profile: &state.profile,
                    stylesheet: &state.stylesheet,
                    today: Local::now().date_naive(),
                };
                make_response(
                    StatusCode::OK,
                    "text/html; charset=utf-8",
                    render_page(&ctx, &inputs, &pass),
                )
            }
            Err(msg) => make_text(StatusCode::BAD_REQUEST, &msg),
        },
        "/api/metrics" => match run_pass(&state, &query).await {
            Ok((_, pass)) => match serde_json::to_vec(&pass.snapshot()) {
                Ok(body) => make_response(StatusCode::OK, "application/json", body),
                Err(e) => {
                    log::error!("[DashboardServer] Failed to serialize snapshot: {}", e);
                    make_text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
                }
            },
            Err(msg) => make_text(StatusCode::BAD_REQUEST, &msg),
        },
        _ => make_text(StatusCode::NOT_FOUND, "Not Found"),
    };
    Ok(response)
}

async fn run_pass(state: &DashboardState, query: &str) -> Result<(DateInputs, RenderPass), String> {
    let params = parse_query(query);
    let (tab, inputs) = parse_inputs(&params, Local::now().date_naive())?;
    let selection = inputs.selection(tab);

    if params.get("refresh").is_some_and(|v| v == "1" || v == "true") {
        state
            .source
            .invalidate_range(&selection.effective_range(state.inception))
            .await;
    }

    let pass = render_pass(&state.source, &state.profile, selection, state.inception).await;
    Ok((inputs, pass))
}

/// Decodes an `application/x-www-form-urlencoded` query. Later keys win and
/// values are trimmed.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.trim().to_string()))
        .collect()
}

/// Resolves the active tab and the dates of both tabs, falling back to the
/// defaults derived from `today` for anything not supplied. `start`/`end`
/// belong to the range tab and `total_end` to the Total tab.
pub fn parse_inputs(
    params: &HashMap<String, String>,
    today: NaiveDate,
) -> Result<(Tab, DateInputs), String> {
    let tab = match params.get("tab").filter(|v| !v.is_empty()) {
        Some(raw) => Tab::from_input(raw).ok_or_else(|| format!("Unknown tab: {}", raw))?,
        None => Tab::DateRange,
    };

    let defaults = DateInputs::defaults(today);
    let inputs = DateInputs {
        start: parse_date_param(params, "start")?.unwrap_or(defaults.start),
        end: parse_date_param(params, "end")?.unwrap_or(defaults.end),
        total_end: parse_date_param(params, "total_end")?.unwrap_or(defaults.total_end),
    };
    Ok((tab, inputs))
}

fn parse_date_param(params: &HashMap<String, String>, key: &str) -> Result<Option<NaiveDate>, String> {
    let Some(raw) = params.get(key).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    let date = NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|_| format!("Invalid {} date {:?}, expected YYYY-MM-DD", key, raw))?;
    check_selectable(date)
        .map(Some)
        .map_err(|msg| format!("Invalid {} date {:?}: {}", key, raw, msg))
}

/// A picked date must leave room for the exclusive end one day later.
fn check_selectable(date: NaiveDate) -> Result<NaiveDate, &'static str> {
    match date.checked_add_days(Days::new(1)) {
        Some(_) => Ok(date),
        None => Err("out of range"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TabSelection;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_query() {
        let params = parse_query("tab=range&start=2024-01-01&refresh&end=");
        assert_eq!(params.get("tab").map(String::as_str), Some("range"));
        assert_eq!(params.get("start").map(String::as_str), Some("2024-01-01"));
        assert_eq!(params.get("refresh").map(String::as_str), Some(""));
        assert_eq!(params.get("end").map(String::as_str), Some(""));
        assert!(parse_query("").is_empty());
    }

    #[test]
    fn test_parse_query_decodes_form_encoding() {
        let params = parse_query("start=2024%2D01%2D01&tab=total+&end=2024-01-01&end=2024-01-07");
        assert_eq!(params.get("start").map(String::as_str), Some("2024-01-01"));
        assert_eq!(params.get("tab").map(String::as_str), Some("total"));
        assert_eq!(params.get("end").map(String::as_str), Some("2024-01-07"));

        let (tab, inputs) = parse_inputs(&params, date(2024, 3, 10)).unwrap();
        assert_eq!(tab, Tab::Total);
        assert_eq!(inputs.start, date(2024, 1, 1));
        assert!(parse_inputs(&parse_query("tab=date%2Drange"), date(2024, 3, 10)).is_ok());
    }

    #[test]
    fn test_parse_inputs_defaults() {
        let today = date(2024, 3, 10);
        assert_eq!(
            parse_inputs(&HashMap::new(), today).unwrap(),
            (Tab::DateRange, DateInputs::defaults(today))
        );
        assert_eq!(
            parse_inputs(&parse_query("tab=total"), today).unwrap(),
            (Tab::Total, DateInputs::defaults(today))
        );
    }

    #[test]
    fn test_parse_inputs_keeps_both_tabs() {
        let today = date(2024, 3, 10);
        let (tab, inputs) = parse_inputs(
            &parse_query("tab=total&start=2024-01-01&end=2024-01-07&total_end=2024-02-29"),
            today,
        )
        .unwrap();
        assert_eq!(tab, Tab::Total);
        assert_eq!(
            inputs,
            DateInputs {
                start: date(2024, 1, 1),
                end: date(2024, 1, 7),
                total_end: date(2024, 2, 29)
            }
        );
        // Range dates never leak into the Total window.
        assert_eq!(
            inputs.selection(tab),
            TabSelection::Total {
                end: date(2024, 2, 29)
            }
        );
    }

    #[test]
    fn test_parse_inputs_rejects_bad_input() {
        let today = date(2024, 3, 10);
        assert!(parse_inputs(&parse_query("start=01/02/2024"), today).is_err());
        assert!(parse_inputs(&parse_query("total_end=tomorrow"), today).is_err());
        assert!(parse_inputs(&parse_query("tab=weekly"), today).is_err());
    }

    #[test]
    fn test_last_representable_date_is_rejected() {
        assert_eq!(check_selectable(NaiveDate::MAX), Err("out of range"));
        assert!(check_selectable(date(2024, 12, 31)).is_ok());

        let raw = NaiveDate::MAX.format(DATE_FORMAT).to_string();
        let params = HashMap::from([("end".to_string(), raw)]);
        let err = parse_inputs(&params, date(2024, 3, 10)).unwrap_err();
        assert!(err.starts_with("Invalid end date"));
    }
}
