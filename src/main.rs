#[tokio::main]
async fn main() {
    if let Err(err) = slack_bridge::mcp::server::run_stdio().await {
        eprintln!("slack-bridge: {}", err);
        std::process::exit(1);
    }
}
