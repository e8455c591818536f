use cartpilot::{
    AuthMode, ChromeDriver, DiagnosticsSink, LaunchSettings, RunReport, SessionAutomaton,
    SiteProfile,
};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Drive a multi-step checkout funnel on a configured site.
#[derive(Parser, Debug)]
#[command(name = "cartpilot", version, about)]
struct Cli {
    /// Site profile name, resolved as <profiles-dir>/<site>.json
    site: String,

    /// Search term for the catalog phase
    term: String,

    /// Authentication mode for sites that distinguish the two: signin or signup
    #[arg(long, default_value = "signin")]
    auth_mode: String,

    /// Directory holding site profile JSON files
    #[arg(long, default_value = "profiles")]
    profiles_dir: PathBuf,

    /// Run the browser with a visible window
    #[arg(long)]
    headed: bool,

    /// Save labelled diagnostic screenshots under this directory
    #[arg(long)]
    diagnostics_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(report) => {
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{}", json),
                Err(e) => error!(error = %e, "report serialization failed"),
            }
            if report.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!(error = %e, "run failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<RunReport> {
    let auth_mode: AuthMode = cli.auth_mode.parse()?;
    let profile_path = cli.profiles_dir.join(format!("{}.json", cli.site));
    let profile = SiteProfile::load(&profile_path).await?;
    info!(site = %profile.site, path = %profile_path.display(), "profile loaded");

    let settings = LaunchSettings {
        headless: !cli.headed,
        ..Default::default()
    };
    let driver = Arc::new(ChromeDriver::launch(&settings)?);

    let diagnostics = match &cli.diagnostics_dir {
        Some(dir) => {
            let run_tag = chrono::Utc::now().format("%Y%m%d-%H%M%S").to_string();
            DiagnosticsSink::to_dir(dir.clone(), run_tag)
        }
        None => DiagnosticsSink::disabled(),
    };

    let automaton = SessionAutomaton::new(driver, profile, diagnostics);
    let report = automaton.run(&cli.term, auth_mode).await?;
    Ok(report)
}
