use std::sync::Arc;

use tracing::{error, info, Level};
use tracing_db_sink::config::SinkConfig;
use tracing_db_sink::init::init_db_sink;
use tracing_db_sink::memory_store::MemoryStore;

#[tokio::main]
async fn main() {
    let store = MemoryStore::new();
    let config = SinkConfig::new("memory-demo")
        .with_max_level(Level::INFO)
        .with_stdout(false);
    let handle =
        init_db_sink(Arc::new(store.clone()), config).expect("failed to start db sink");

    info!(user = "alice", "user signed in");
    error!(error_code = 500, "payment failed: gateway timeout");

    let snapshot = handle.metrics();
    handle.shutdown().await;

    for row in store.rows() {
        println!(
            "{} {:6} #{} {}",
            row.day_id,
            row.level_name,
            row.message_num,
            row.message.as_deref().unwrap_or(""),
        );
    }
    println!(
        "enqueued {} events, committed batches of sizes {:?}",
        snapshot.events_enqueued,
        store.batch_sizes(),
    );
}
