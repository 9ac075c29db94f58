use clap::Parser;
use docsim_cli::Cli;

#[tokio::main]
async fn main() {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    docsim_cli::init_logging(cli.verbose);

    if let Err(err) = docsim_cli::run_main(cli).await {
        tracing::error!("{err:#}");
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
