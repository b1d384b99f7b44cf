#[cfg(feature = "cli")]
use chat_context::{config::Config, telemetry, thread_server, worker_threads::SummaryWorker};
#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "chat-context", version, about = "Conversation backend with rolling summaries")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server and background jobs (default)
    Serve,
    /// Run a single deferred summary sweep and exit
    Sweep,
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing("info");

    let cfg = Config::from_env()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => thread_server::run_thread_server(cfg).await,
        Command::Sweep => {
            let services = thread_server::build_services(&cfg)?;
            let worker = SummaryWorker::new(services.store, services.engine);
            let stats = worker.run_sweep().await?;
            println!(
                "processed={} summarized={} skipped={} failed={}",
                stats.processed, stats.summarized, stats.skipped, stats.failed
            );
            Ok(())
        }
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
