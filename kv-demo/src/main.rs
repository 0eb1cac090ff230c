use etcd_kv::Client;
use kv_demo::{DemoRunner, config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = config::from_env()?;
    if config.request_timeout < kv_demo::minimum_budget() {
        tracing::warn!(
            timeout = ?config.request_timeout,
            "request timeout is shorter than a lease expiry, the lease scenario will time out"
        );
    }

    let client = match Client::connect(config).await {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("cannot connect: {}", e);
            return Err(e.into());
        }
    };

    let failed = DemoRunner::new(client).run_all().await;
    if failed > 0 {
        tracing::warn!(failed, "some scenarios were aborted");
    }

    Ok(())
}
