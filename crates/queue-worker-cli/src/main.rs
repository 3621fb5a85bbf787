use queue_worker_cli::run_cli;
use tracing::error;

#[tokio::main]
async fn main() {
    if let Err(e) = run_cli().await {
        error!(exit_code = e.exit_code(), "CLI error: {}", e);
        // Logging may be filtered off or not yet initialized
        eprintln!("Error: {}", e);

        std::process::exit(e.exit_code());
    }
}
