use chatswarm::Swarm;
use std::process;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let swarm = match Swarm::from_env() {
        Ok(swarm) => swarm,
        Err(e) => {
            error!(error = %e, category = e.category(), "startup failed");
            process::exit(1);
        }
    };

    let summary = swarm.run().await;
    print!("{}", summary);

    if let Ok(path) = std::env::var("SUMMARY_PATH") {
        match serde_json::to_vec_pretty(&summary) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    error!(path, error = %e, "can't write summary file");
                }
            }
            Err(e) => error!(error = %e, "can't serialize summary"),
        }
    }
}
