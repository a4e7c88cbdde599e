use market_dashboard::app;
use market_dashboard::error::Result;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    app::bootstrap::run().await
}
