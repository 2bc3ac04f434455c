//! Write and prepare server orchestration configs.
//!
//! ```bash
//! orchestration oidc --output .evergreen/orchestration/configs/replica_sets/auth-oidc.json
//! orchestration oidc --azure --output .evergreen/orchestration/configs/servers/auth-oidc.json
//! ORCHESTRATION_FILE=basic.json DRIVERS_TOOLS=$PWD orchestration prepare --output config.json
//! ```

use clap::{Args, Parser, Subcommand};
use evergreen_tools::orchestration::{self, AzureOidcSettings, OrchestrationConfig, OrchestrationError};
use evergreen_tools::report;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

const TOOL: &str = "orchestration";
const NO_IPV6_VAR: &str = "NO_IPV6";
const REQUIRE_API_VERSION_VAR: &str = "REQUIRE_API_VERSION";

#[derive(Parser, Debug)]
#[command(name = TOOL, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the OIDC orchestration config
    Oidc {
        /// Single server trusting the Azure tenant instead of the test replica set
        #[arg(long)]
        azure: bool,

        #[command(flatten)]
        azure_settings: AzureArgs,

        /// Bind IPv4 only; also on whenever NO_IPV6 is set, whatever its value
        #[arg(long)]
        no_ipv6: bool,

        /// Where to write the config
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Copy an orchestration file, filling in the tools path
    Prepare {
        /// Orchestration file to start from
        #[arg(long, env = "ORCHESTRATION_FILE")]
        input: PathBuf,

        /// Absolute path of the tools checkout
        #[arg(long, env = "DRIVERS_TOOLS")]
        drivers_tools: PathBuf,

        /// Where to write the prepared file
        #[arg(short, long)]
        output: PathBuf,

        /// Pin the server to stable API version 1; also on when
        /// REQUIRE_API_VERSION is non-empty
        #[arg(long)]
        require_api_version: bool,
    },
}

#[derive(Args, Debug)]
struct AzureArgs {
    /// Managed identity client id
    #[arg(long, env = "AZUREOIDC_USERNAME", required_if_eq("azure", "true"))]
    azure_username: Option<String>,

    #[arg(long, env = "AZUREOIDC_TENANTID", required_if_eq("azure", "true"))]
    azure_tenant_id: Option<String>,

    /// App registration client id used as the token audience
    #[arg(long, env = "AZUREOIDC_CLIENTID", required_if_eq("azure", "true"))]
    azure_client_id: Option<String>,

    #[arg(long, env = "AZUREOIDC_AUTHPREFIX", required_if_eq("azure", "true"))]
    azure_auth_prefix: Option<String>,
}

impl AzureArgs {
    fn settings(&self) -> Option<AzureOidcSettings> {
        Some(AzureOidcSettings {
            username: self.azure_username.clone()?,
            tenant_id: self.azure_tenant_id.clone()?,
            app_client_id: self.azure_client_id.clone()?,
            auth_prefix: self.azure_auth_prefix.clone()?,
        })
    }
}

fn run(cli: Cli) -> Result<String, OrchestrationError> {
    match cli.command {
        Command::Oidc {
            azure,
            azure_settings,
            no_ipv6,
            output,
        } => {
            let ipv6 = !no_ipv6 && env::var_os(NO_IPV6_VAR).is_none();
            let config = match azure_settings.settings().filter(|_| azure) {
                Some(settings) => OrchestrationConfig::oidc_azure_server(&settings, ipv6)?,
                None => OrchestrationConfig::oidc_replica_set(ipv6)?,
            };
            config.write_to(&output)?;
            Ok(format!("Wrote OIDC config to {}", output.display()))
        }
        Command::Prepare {
            input,
            drivers_tools,
            output,
            require_api_version,
        } => {
            let require_api_version = require_api_version
                || env::var_os(REQUIRE_API_VERSION_VAR).is_some_and(|value| !value.is_empty());
            let written =
                orchestration::prepare(&input, &drivers_tools, &output, require_api_version)?;
            // Callers capture stdout to find the file.
            println!("{}", written.display());
            Ok(format!("prepared {}", written.display()))
        }
    }
}

fn main() -> ExitCode {
    evergreen_tools::init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(message) => {
            report::success(TOOL, message);
            ExitCode::SUCCESS
        }
        Err(err) => {
            report::failure(TOOL, &err);
            ExitCode::FAILURE
        }
    }
}
