use std::sync::Arc;
use std::time::Duration;

use mvcc_server::{db, grpc, lease, storage};

const DEFAULT_ADDR: &str = "127.0.0.1:2379";
const DEFAULT_DATABASE_URL: &str = "sqlite::memory:";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let addr = std::env::var("MVCC_SERVER_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let database_url =
        std::env::var("MVCC_DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

    let pool = db::init_pool(&database_url).await?;
    let storage = Arc::new(storage::Storage::new(pool));
    let _reaper = lease::spawn_reaper(storage.clone(), Duration::from_millis(100));

    let addr = addr.parse()?;
    tracing::info!(%addr, database = %database_url, "mvcc-server listening");
    grpc::create_router(storage).serve(addr).await?;

    Ok(())
}
