use clap::{CommandFactory, Parser};
use clap_complete::aot::generate;
use devfleet::cli::{Cli, Commands};
use devfleet::commands;

#[tokio::main]
async fn main() {
    // Logs go to stderr so tables on stdout stay clean.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Up { services, follow } => commands::up::run(&cli.global, services, follow).await,
        Commands::Ls => commands::ls::run(&cli.global),
        Commands::Plan => commands::plan::run(&cli.global),
        Commands::Doctor => commands::doctor::run(&cli.global),
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "devfleet", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
