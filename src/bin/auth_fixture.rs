//! Provision an external-identity user on a freshly started server.
//!
//! ```bash
//! # AWS IAM from an ECS task; verifies a MONGODB-AWS login afterwards
//! auth-fixture aws-ecs
//!
//! # OIDC workload identity, logging in as the orchestration admin
//! AZUREOIDC_USERNAME=bob auth-fixture oidc
//!
//! # Show the shell script without running it
//! auth-fixture --print oidc
//!
//! # Stand-in identity provider for AWS web-identity logins
//! IDP_ISSUER=... IDP_JWKS_URI=... IDP_RSA_KEY=... auth-fixture idp token
//! ```

use clap::{Parser, Subcommand};
use evergreen_tools::fixtures::idp::{IdpSettings, MockIdentityProvider};
use evergreen_tools::fixtures::{self, FixturePlan, MongoShell, DEFAULT_OIDC_ADMIN};
use evergreen_tools::report;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

const TOOL: &str = "auth-fixture";

#[derive(Parser, Debug)]
#[command(name = TOOL, version, about)]
struct Cli {
    /// Connection string of the server to provision
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    uri: String,

    /// Database shell used to run the fixture
    #[arg(long, env = "MONGOSH", default_value = "mongosh")]
    shell: PathBuf,

    /// Print the rendered script instead of running it
    #[arg(long)]
    print: bool,

    #[command(subcommand)]
    fixture: Fixture,
}

#[derive(Subcommand, Debug)]
enum Fixture {
    /// MONGODB-AWS user for the ECS task role
    AwsEcs,
    /// MONGODB-OIDC user for the Kubernetes service account
    Oidc {
        /// Admin created by the OIDC orchestration config
        #[arg(long, env = "AZUREOIDC_USERNAME", default_value = DEFAULT_OIDC_ADMIN)]
        admin_user: String,
    },
    /// Print a document from the stand-in OpenID provider
    Idp {
        #[command(subcommand)]
        document: IdpDocument,
    },
}

#[derive(Subcommand, Debug)]
enum IdpDocument {
    /// Signed ID token for the test user
    Token {
        /// Also write the token here
        #[arg(long, env = "AWS_WEB_IDENTITY_TOKEN_FILE")]
        token_file: Option<PathBuf>,
    },
    /// Public key set
    Jwks,
    /// Discovery document
    Config,
    /// Subject the token is issued for
    #[command(alias = "user_id")]
    UserId,
}

/// Returns the success line to report, or `None` when the output itself is
/// the result.
async fn run(cli: Cli) -> Result<Option<String>, Box<dyn Error>> {
    let plan = match cli.fixture {
        Fixture::AwsEcs => FixturePlan::aws_ecs(),
        Fixture::Oidc { ref admin_user } => FixturePlan::oidc(admin_user),
        Fixture::Idp { document } => {
            let provider = MockIdentityProvider::new(IdpSettings::from_env()?)?;
            let output = match document {
                IdpDocument::Token { token_file: Some(path) } => provider.write_token(&path)?,
                IdpDocument::Token { token_file: None } => provider.id_token()?,
                IdpDocument::Jwks => serde_json::to_string(&provider.jwks())?,
                IdpDocument::Config => serde_json::to_string(&provider.configuration())?,
                IdpDocument::UserId => provider.user_id(),
            };
            print!("{output}");
            return Ok(None);
        }
    };

    if cli.print {
        print!("{}", plan.render(&cli.uri)?);
        return Ok(None);
    }
    fixtures::apply(&plan, &cli.uri, &MongoShell::new(&cli.shell)).await?;
    Ok(Some(format!("{} fixture applied", plan.name)))
}

#[tokio::main]
async fn main() -> ExitCode {
    evergreen_tools::init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(message) => {
            if let Some(message) = message {
                report::success(TOOL, message);
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            report::failure(TOOL, err.as_ref());
            ExitCode::FAILURE
        }
    }
}
