//! Print the key count of a deployment
//!
//! Usage: `cargo run --example total_keys -- [redis-url | profile.toml]`

use keyscope::{
    get_total_keys, ClientContext, ClientMetadata, ClientPool, CommandExecutor, CommandExt,
    ConnectionConfig, ConnectionProfile, InfoCommand, KeyspaceInfo, KEY_COUNT_UNAVAILABLE,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let target = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "redis://localhost:6379".to_string());
    let (id, config) = if target.ends_with(".toml") {
        let profile = ConnectionProfile::from_toml_str(&std::fs::read_to_string(&target)?)?;
        (profile.id.clone(), profile.into_config()?)
    } else {
        ("default".to_string(), ConnectionConfig::from_url(&target)?)
    };

    let pool = Arc::new(ClientPool::with_idle_timeout(Duration::from_secs(300)));
    let _sweeper = pool.spawn_idle_sweeper(Duration::from_secs(60));

    let metadata = ClientMetadata::new(id).with_context(ClientContext::Browser);
    let client = pool.get_or_connect(&metadata, config).await?;
    println!("Connected to {} deployment", client.topology());

    match get_total_keys(client.as_ref()).await {
        KEY_COUNT_UNAVAILABLE => println!("Total keys: unknown"),
        total => println!("Total keys: {}", total),
    }

    let info = client.execute(InfoCommand::keyspace()).await?;
    let keyspace = KeyspaceInfo::from_info(&info);
    for index in keyspace.indexes() {
        println!("  db{}: {} keys", index, keyspace.key_count(index)?);
    }

    Ok(())
}
