//! Server orchestration configs used by the auth test setups.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Placeholder in checked-in orchestration files for the tools checkout.
pub const PATH_TOKEN: &str = "ABSOLUTE_PATH_REPLACEMENT_TOKEN";

const AUTH_MECHANISMS: &str = "SCRAM-SHA-1,SCRAM-SHA-256,MONGODB-OIDC";
const BIND_IP: &str = "0.0.0.0,::1";

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid orchestration JSON in {path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },

    #[error("Failed to serialize orchestration config: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("{path} does not contain a JSON object")]
    NotAnObject { path: String },
}

/// One entry of the server's `oidcIdentityProviders` parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityProvider {
    pub auth_name_prefix: String,
    pub issuer: String,
    pub client_id: String,
    pub audience: String,
    pub authorization_claim: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_scopes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supports_human_flows: Option<bool>,
}

impl IdentityProvider {
    /// The workload-identity provider the replica set tests use.
    pub fn test_provider() -> Self {
        Self {
            auth_name_prefix: "test1".to_string(),
            issuer: "https://eastus.oic.prod-aks.azure.com/c96563a8-841b-4ef9-af16-33548de0c958/6f427304-facf-4098-a3de-e24dcb798284/".to_string(),
            client_id: "system:serviceaccount:default:oidc-test-sa".to_string(),
            audience: "api://AzureADTokenExchange".to_string(),
            authorization_claim: "foo".to_string(),
            request_scopes: Some(vec!["fizz".to_string(), "buzz".to_string()]),
            match_pattern: Some("test_user1".to_string()),
            supports_human_flows: None,
        }
    }

    pub fn azure(settings: &AzureOidcSettings) -> Self {
        Self {
            auth_name_prefix: settings.auth_prefix.clone(),
            issuer: format!("https://sts.windows.net/{}/", settings.tenant_id),
            client_id: settings.username.clone(),
            audience: format!("api://{}", settings.app_client_id),
            authorization_claim: "groups".to_string(),
            request_scopes: None,
            match_pattern: None,
            supports_human_flows: Some(false),
        }
    }
}

/// Azure tenant the `--azure` server config is built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureOidcSettings {
    /// Managed identity client id; also the admin login.
    pub username: String,
    pub tenant_id: String,
    /// Client id of the app registration the tokens are issued for.
    pub app_client_id: String,
    pub auth_prefix: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetParameter {
    enable_test_commands: u8,
    authentication_mechanisms: &'static str,
    /// The server wants the provider list as a JSON string, not an array.
    oidc_identity_providers: String,
}

#[derive(Debug, Clone, Serialize)]
struct ProcParams {
    ipv6: bool,
    bind_ip: &'static str,
    logappend: bool,
    port: u16,
    #[serde(rename = "setParameter")]
    set_parameter: SetParameter,
}

#[derive(Debug, Clone, Serialize)]
struct RsParams {
    priority: u32,
}

#[derive(Debug, Clone, Serialize)]
struct Member {
    #[serde(rename = "procParams")]
    proc_params: ProcParams,
    #[serde(rename = "rsParams", skip_serializing_if = "Option::is_none")]
    rs_params: Option<RsParams>,
}

/// Either a single server (`procParams`) or a replica set (`members`).
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationConfig {
    id: &'static str,
    auth_key: &'static str,
    login: String,
    name: &'static str,
    password: &'static str,
    #[serde(rename = "procParams", skip_serializing_if = "Option::is_none")]
    proc_params: Option<ProcParams>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    members: Vec<Member>,
}

fn oidc_proc_params(
    providers: &[IdentityProvider],
    port: u16,
    ipv6: bool,
) -> Result<ProcParams, OrchestrationError> {
    Ok(ProcParams {
        ipv6,
        bind_ip: BIND_IP,
        logappend: true,
        port,
        set_parameter: SetParameter {
            enable_test_commands: 1,
            authentication_mechanisms: AUTH_MECHANISMS,
            oidc_identity_providers: serde_json::to_string(providers)?,
        },
    })
}

impl OrchestrationConfig {
    /// Two-member replica set on 27017/27018; the second member never
    /// becomes primary.
    pub fn oidc_replica_set(ipv6: bool) -> Result<Self, OrchestrationError> {
        let providers = [IdentityProvider::test_provider()];
        Ok(Self {
            id: "oidc-repl0",
            auth_key: "secret",
            login: "bob".to_string(),
            name: "mongod",
            password: "pwd123",
            proc_params: None,
            members: vec![
                Member {
                    proc_params: oidc_proc_params(&providers, 27017, ipv6)?,
                    rs_params: None,
                },
                Member {
                    proc_params: oidc_proc_params(&providers, 27018, ipv6)?,
                    rs_params: Some(RsParams { priority: 0 }),
                },
            ],
        })
    }

    /// Single server trusting the Azure tenant.
    pub fn oidc_azure_server(
        settings: &AzureOidcSettings,
        ipv6: bool,
    ) -> Result<Self, OrchestrationError> {
        let providers = [IdentityProvider::azure(settings)];
        Ok(Self {
            id: "oidc-repl0",
            auth_key: "secret",
            login: settings.username.clone(),
            name: "mongod",
            password: "pwd123",
            proc_params: Some(oidc_proc_params(&providers, 27017, ipv6)?),
            members: Vec::new(),
        })
    }

    /// Pretty JSON with four-space indentation.
    pub fn to_json(&self) -> Result<String, OrchestrationError> {
        to_pretty_json(self)
    }

    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub fn write_to(&self, path: &Path) -> Result<(), OrchestrationError> {
        let json = self.to_json()?;
        write_file(path, &json)?;
        info!("wrote OIDC orchestration config");
        Ok(())
    }
}

fn to_pretty_json<T: Serialize>(value: &T) -> Result<String, OrchestrationError> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;
    // serde_json only ever emits UTF-8.
    Ok(String::from_utf8_lossy(&out).into_owned())
}

fn write_file(path: &Path, contents: &str) -> Result<(), OrchestrationError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| OrchestrationError::Write {
            path: parent.display().to_string(),
            source,
        })?;
    }
    fs::write(path, contents).map_err(|source| OrchestrationError::Write {
        path: path.display().to_string(),
        source,
    })
}

/// Copy an orchestration file to `output`, pointing it at the tools
/// checkout and optionally pinning the server to API version 1.
#[instrument(fields(input = %input.display(), output = %output.display()), skip(input, output, drivers_tools))]
pub fn prepare(
    input: &Path,
    drivers_tools: &Path,
    output: &Path,
    require_api_version: bool,
) -> Result<PathBuf, OrchestrationError> {
    let text = fs::read_to_string(input).map_err(|source| OrchestrationError::Read {
        path: input.display().to_string(),
        source,
    })?;
    let text = text.replace(PATH_TOKEN, &drivers_tools.display().to_string());

    let text = if require_api_version {
        let mut value: serde_json::Value =
            serde_json::from_str(&text).map_err(|source| OrchestrationError::Json {
                path: input.display().to_string(),
                source,
            })?;
        let object = value
            .as_object_mut()
            .ok_or_else(|| OrchestrationError::NotAnObject {
                path: input.display().to_string(),
            })?;
        object.insert(
            "requireApiVersion".to_string(),
            serde_json::Value::String("1".to_string()),
        );
        debug!("set requireApiVersion");
        to_pretty_json(&value)?
    } else {
        text
    };

    write_file(output, &text)?;
    Ok(output.to_path_buf())
}
