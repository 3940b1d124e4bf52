#[tokio::main]
async fn main() {
    if let Err(e) = metrics_dashboard_lib::run().await {
        log::error!("[Setup] {}", e);
        eprintln!("metrics-dashboard: {}", e);
        std::process::exit(1);
    }
}
