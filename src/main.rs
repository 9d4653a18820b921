use colored::Colorize;
use tracing::error;

#[tokio::main]
async fn main() {
    if let Err(e) = proxlb::cli::run().await {
        error!(error = %e, "ProxLB stopped");
        eprintln!("{} {}", "✗".red(), e);
        std::process::exit(e.exit_code());
    }
}
