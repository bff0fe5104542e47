use anyhow::Result;
use clap::Parser;
use log::debug;
use std::path::PathBuf;
use std::process::exit;

use cellar::cellar::Cellar;
use cellar::check::ProcessRunner;
use cellar::cleanup;
use cellar::error::PipelineError;
use cellar::fetch::HttpFetcher;
use cellar::install;
use cellar::runtime::RealRuntime;

/// cellar - descriptor-driven package installer
///
/// Install tools from declarative JSON descriptors into isolated,
/// digest-verified environments under the cellar root.
///
/// Examples:
///   cellar install polyparse.json    # Install a descriptor
///   cellar verify polyparse          # Re-run the post-install smoke test
#[derive(Parser, Debug)]
#[command(author, version = env!("CELLAR_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Cellar root directory (overrides the default ~/.cellar; also via CELLAR_ROOT)
    #[arg(
        long = "root",
        short = 'r',
        env = "CELLAR_ROOT",
        value_name = "PATH",
        global = true
    )]
    pub cellar_root: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Install a package from a descriptor file
    Install(InstallArgs),

    /// Re-run the post-install verification of an installed package
    Verify(VerifyArgs),

    /// Remove an installed package
    Remove(RemoveArgs),

    /// List installed packages
    List,
}

#[derive(clap::Args, Debug)]
pub struct InstallArgs {
    /// Path to the package descriptor (JSON)
    #[arg(value_name = "DESCRIPTOR")]
    pub descriptor: PathBuf,

    /// Rebuild the environment even if this version is already installed
    #[arg(long)]
    pub force: bool,
}

#[derive(clap::Args, Debug)]
pub struct VerifyArgs {
    /// The package name
    #[arg(value_name = "NAME")]
    pub name: String,
}

#[derive(clap::Args, Debug)]
pub struct RemoveArgs {
    /// The package name
    #[arg(value_name = "NAME")]
    pub name: String,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<PipelineError>()
            .map(PipelineError::exit_code)
            .unwrap_or(1);
        exit(code);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let runtime = RealRuntime;
    let cellar = Cellar::new(&runtime, cli.cellar_root)?;
    debug!("Cellar root: {:?}", cellar.root());

    match cli.command {
        Commands::Install(args) => {
            let cleanup_ctx = cleanup::new_shared();

            // A cancelled install must leave a Failed marker behind before
            // the process dies.
            let ctrlc_ctx = cleanup_ctx.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("\nInterrupted.");
                    ctrlc_ctx.lock().unwrap().cleanup();
                    exit(130);
                }
            });

            let fetcher = HttpFetcher::new()?;
            install::install(
                &runtime,
                &fetcher,
                &ProcessRunner,
                &cellar,
                &args.descriptor,
                args.force,
                cleanup_ctx,
            )
            .await
        }
        Commands::Verify(args) => {
            install::verify(&runtime, &ProcessRunner, &cellar, &args.name).await
        }
        Commands::Remove(args) => install::remove(&runtime, &cellar, &args.name),
        Commands::List => install::list(&runtime, &cellar),
    }
}
