use clap::{Parser, Subcommand};
use localtalk::config::Config;
use localtalk::runtime::{Runtime, RuntimeError};

#[derive(Parser)]
#[command(name = "localtalk")]
#[command(about = "LocalSend v2 peer-to-peer file transfer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run discovery and the HTTP server until interrupted.
    Serve {
        #[arg(long, help = "Path to a Localtalk.toml config file")]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Serve { config } => run_serve(config.as_deref()).await,
    };

    std::process::exit(exit_code);
}

async fn run_serve(config_path: Option<&str>) -> i32 {
    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return 2;
        }
    };

    let runtime = match Runtime::new(config).await {
        Ok(runtime) => runtime,
        Err(err) => return exit_code_for(&err),
    };

    match runtime.run().await {
        Ok(()) => 0,
        Err(err) => exit_code_for(&err),
    }
}

fn exit_code_for(err: &RuntimeError) -> i32 {
    eprintln!("localtalk: {err}");
    match err {
        RuntimeError::Config(_) => 2,
        RuntimeError::Bind(_) => 3,
        RuntimeError::Serve(_) | RuntimeError::Settings(_) | RuntimeError::Io(_) => 1,
    }
}
