//! Auth fixtures: leave a fresh database in a state where an external
//! identity can log in with a given mechanism.
//!
//! [`idp`] holds the stand-in identity provider the AWS web-identity
//! login is tested against.
//!
//! A fixture is a fixed list of [`Step`]s. The list is rendered into a
//! script for the database shell and handed to a [`ShellRunner`]; the first
//! failing step aborts the script and the shell exits non-zero.

pub mod idp;
pub mod shell;

pub use shell::{MongoShell, ShellRunner};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument};

/// Users that authenticate outside the server's own credential store live
/// in this database.
pub const EXTERNAL_DB: &str = "$external";

/// Role ARN of the ECS task the AWS hosted test runs as. The account id and
/// role name depend on the hosting task.
pub const AWS_ECS_TASK_ARN: &str = "arn:aws:sts::557821124784:assumed-role/ecsTaskExecutionRole/*";

pub const OIDC_USER: &str = "test1/system:serviceaccount:drivers-python:default";
pub const OIDC_ADMIN_PASSWORD: &str = "pwd123";
pub const DEFAULT_OIDC_ADMIN: &str = "bob";

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("Failed to render fixture command: {0}")]
    Render(#[from] serde_json::Error),

    #[error("Failed to start {shell}: {source}")]
    Spawn {
        shell: String,
        source: std::io::Error,
    },

    #[error("{shell} exited with {status}: {stderr}")]
    ShellFailed {
        shell: String,
        status: String,
        stderr: String,
    },
}

/// A role grant: either a built-in name (`"root"`) or a role scoped to a
/// database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Role {
    Builtin(String),
    Scoped { role: String, db: String },
}

impl Role {
    pub fn builtin(name: &str) -> Self {
        Role::Builtin(name.to_string())
    }

    pub fn scoped(role: &str, db: &str) -> Self {
        Role::Scoped {
            role: role.to_string(),
            db: db.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// `createUser` on `db`. External users carry no password.
    CreateUser {
        db: String,
        user: String,
        password: Option<String>,
        roles: Vec<Role>,
    },
    /// Authenticate the admin connection with a password.
    Authenticate {
        db: String,
        user: String,
        password: String,
    },
    /// Open a second connection and log in to `$external` with `mechanism`,
    /// taking credentials from the shell's environment.
    VerifyExternalAuth { mechanism: String },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateUserCommand<'a> {
    create_user: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pwd: Option<&'a str>,
    roles: &'a [Role],
}

#[derive(Serialize)]
struct MechanismAuth<'a> {
    mechanism: &'a str,
}

/// Shell helpers every rendered script starts with. Both throw on failure so
/// the shell stops at the first broken step.
const PRELUDE: &str = r#"function runChecked(conn, dbName, command) {
  const res = conn.getDB(dbName).runCommand(command);
  if (!res.ok) {
    throw new Error(`command failed on ${dbName}: ${JSON.stringify(res)}`);
  }
  return res;
}
function authChecked(conn, dbName, ...args) {
  const res = conn.getDB(dbName).auth(...args);
  if (res === false || (res && res.ok === 0)) {
    throw new Error(`authentication failed on ${dbName}`);
  }
}
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixturePlan {
    pub name: &'static str,
    pub steps: Vec<Step>,
}

impl FixturePlan {
    /// AWS IAM from an ECS task: bootstrap a root admin over the localhost
    /// exception, map the task role to `read` on `aws`, then prove a fresh
    /// connection gets in with `MONGODB-AWS`.
    pub fn aws_ecs() -> Self {
        Self {
            name: "aws-ecs",
            steps: vec![
                Step::CreateUser {
                    db: "admin".to_string(),
                    user: "admin".to_string(),
                    password: Some("pwd".to_string()),
                    roles: vec![Role::builtin("root")],
                },
                Step::Authenticate {
                    db: "admin".to_string(),
                    user: "admin".to_string(),
                    password: "pwd".to_string(),
                },
                Step::CreateUser {
                    db: EXTERNAL_DB.to_string(),
                    user: AWS_ECS_TASK_ARN.to_string(),
                    password: None,
                    roles: vec![Role::scoped("read", "aws")],
                },
                Step::VerifyExternalAuth {
                    mechanism: "MONGODB-AWS".to_string(),
                },
            ],
        }
    }

    /// OIDC: log in as the admin the orchestration config created and map
    /// the workload identity to `readWriteAnyDatabase`.
    pub fn oidc(admin_user: &str) -> Self {
        Self {
            name: "oidc",
            steps: vec![
                Step::Authenticate {
                    db: "admin".to_string(),
                    user: admin_user.to_string(),
                    password: OIDC_ADMIN_PASSWORD.to_string(),
                },
                Step::CreateUser {
                    db: EXTERNAL_DB.to_string(),
                    user: OIDC_USER.to_string(),
                    password: None,
                    roles: vec![Role::scoped("readWriteAnyDatabase", "admin")],
                },
            ],
        }
    }

    /// Render the plan as a shell script against `uri`.
    pub fn render(&self, uri: &str) -> Result<String, FixtureError> {
        let uri = js(uri)?;
        let mut lines = vec![format!("const conn = new Mongo({uri});")];

        for step in &self.steps {
            match step {
                Step::CreateUser {
                    db,
                    user,
                    password,
                    roles,
                } => {
                    let command = serde_json::to_string(&CreateUserCommand {
                        create_user: user,
                        pwd: password.as_deref(),
                        roles,
                    })?;
                    lines.push(format!("print({});", js(&format!("Creating user {user} on {db}"))?));
                    lines.push(format!("runChecked(conn, {}, {command});", js(db)?));
                }
                Step::Authenticate { db, user, password } => {
                    lines.push(format!("print({});", js(&format!("Authenticating as {user}"))?));
                    lines.push(format!(
                        "authChecked(conn, {}, {}, {});",
                        js(db)?,
                        js(user)?,
                        js(password)?
                    ));
                }
                Step::VerifyExternalAuth { mechanism } => {
                    let auth = serde_json::to_string(&MechanismAuth { mechanism })?;
                    lines.push(format!("print({});", js(&format!("Verifying {mechanism} login"))?));
                    lines.push(format!(
                        "authChecked(new Mongo({uri}), {}, {auth});",
                        js(EXTERNAL_DB)?
                    ));
                }
            }
        }

        let mut script = String::from(PRELUDE);
        for line in lines {
            script.push_str(&line);
            script.push('\n');
        }
        Ok(script)
    }
}

/// Quote a string as a JavaScript literal.
fn js(value: &str) -> Result<String, FixtureError> {
    Ok(serde_json::to_string(value)?)
}

/// Render `plan` and run it through `shell`.
#[instrument(skip_all, fields(fixture = plan.name))]
pub async fn apply(
    plan: &FixturePlan,
    uri: &str,
    shell: &dyn ShellRunner,
) -> Result<(), FixtureError> {
    let script = plan.render(uri)?;
    info!(steps = plan.steps.len(), "applying auth fixture");
    shell.run(&script).await?;
    info!("auth fixture applied");
    Ok(())
}
