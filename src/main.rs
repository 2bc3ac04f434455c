use clap::{ArgAction, Parser};
use evergreen_tools::checkout;
use evergreen_tools::config::Config;
use evergreen_tools::github::GitHubClient;
use evergreen_tools::reconcile::{self, Outcome};
use evergreen_tools::report;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info, instrument};

const TOOL: &str = "create-or-modify-comment";

/// Create or update the bot comment on the pull request for a checkout.
///
/// Finds the open pull request whose head is the checkout's HEAD, then
/// replaces the first comment containing the match string with the contents
/// of the comment file, or adds a new comment when none contains it.
#[derive(Parser, Debug)]
#[command(name = TOOL, version, about, disable_version_flag = true)]
#[command(override_usage = "create-or-modify-comment [OPTIONS]...")]
struct Cli {
    /// The source path of the repo.
    #[arg(short = 's', long)]
    source_path: PathBuf,

    /// The comment body to match
    #[arg(short = 'm', long)]
    body_match: String,

    /// The path to the comment body file
    #[arg(short = 'c', long)]
    comment_path: PathBuf,

    /// Print version
    #[arg(short = 'v', long, action = ArgAction::Version)]
    version: (),
}

#[tokio::main]
async fn main() -> ExitCode {
    evergreen_tools::init_tracing();
    let cli = Cli::parse();

    match run(&cli).await {
        Ok(outcome) => {
            report::success(TOOL, outcome);
            ExitCode::SUCCESS
        }
        Err(err) => {
            report::failure(TOOL, err.as_ref());
            ExitCode::FAILURE
        }
    }
}

#[instrument(skip_all, fields(source = %cli.source_path.display()))]
async fn run(cli: &Cli) -> Result<Outcome, Box<dyn std::error::Error>> {
    // Everything local is validated before the first request goes out.
    let config = Config::load()?;
    let body = reconcile::read_comment_body(&cli.comment_path)?;
    debug!(bytes = body.len(), "read comment body");

    let checkout = checkout::resolve(&cli.source_path, &config.github.host)?;
    info!(
        owner = %checkout.identity.owner,
        repo = %checkout.identity.repo,
        sha = %checkout.head_sha,
        "resolved checkout"
    );

    let client = GitHubClient::for_owner(&config, &checkout.identity.owner).await?;
    let outcome = reconcile::reconcile(&client, &checkout, &cli.body_match, &body).await?;
    Ok(outcome)
}
