//! Leader Candidate - example of the election recipe.
//!
//! This example demonstrates:
//! - Loading a `ClientConfig` from JSON with `ClientConfig::from_json`
//! - Observing session events through a default watcher
//! - Running a `LeaderElection` candidate until Ctrl-C
//!
//! # Running
//!
//! Start two or more copies against the same server; stopping the leader
//! promotes the next candidate.
//!
//! ```text
//! cargo run --example leader -- '{"connect_string": "127.0.0.1:2181/demo"}' host-a
//! ```

use std::sync::Arc;

use zkwire_client::{ClientBuilder, ClientConfig, LeaderElection, WatchedEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(json) => ClientConfig::from_json(&json)?,
        None => ClientConfig::default(),
    };
    let name = args.next().unwrap_or_else(|| format!("pid-{}", std::process::id()));

    let client = ClientBuilder::from_config(config)
        .default_watcher(Arc::new(|event: WatchedEvent| {
            eprintln!("session event: {:?}", event.state);
        }))
        .connect()
        .await?;

    let election = LeaderElection::new(client.clone(), "/leader", "candidate", name.clone().into_bytes())?;
    let leader_name = name.clone();
    election.subscribe(Arc::new(move || {
        println!("{} is now the leader", leader_name);
    }));
    election.start().await?;

    if let Some(candidate) = election.candidate() {
        println!("{} joined as {} (sequence {})", name, candidate.path, candidate.sequence);
    }

    tokio::select! {
        result = election.wait_for_leadership() => {
            result?;
            tokio::signal::ctrl_c().await?;
        }
        _ = tokio::signal::ctrl_c() => {}
    }

    election.close().await;
    client.close().await?;
    Ok(())
}
