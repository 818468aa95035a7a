use anyhow::{Context, Result, anyhow, bail};
use campus_session::{
    ApiRequest, GatewayConfig, RememberedLogin, Role, SessionEvent, SessionGateway,
};
use clap::Subcommand;
use http::Method;
use std::path::PathBuf;
use tracing::info;

#[derive(Subcommand)]
pub enum Commands {
    #[command(flatten)]
    Session(SessionCommand),
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Commands that talk to the backend through a session gateway
#[derive(Subcommand)]
pub enum SessionCommand {
    /// Log in and store the issued session
    Login {
        /// Account role (student, staff, admin)
        #[arg(short, long, default_value = "student")]
        role: Role,

        /// Username
        #[arg(short, long)]
        username: Option<String>,

        /// Password; falls back to the remembered one
        #[arg(short, long, env = "CAMPUS_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Remember username and password for later logins
        #[arg(long)]
        remember: bool,

        /// Forget any remembered username and password
        #[arg(long, conflicts_with = "remember")]
        forget: bool,
    },
    /// End the session and clear stored credentials
    Logout,
    /// Show the logged-in account
    Whoami,
    /// Change the password of the logged-in account
    ResetPassword {
        /// Current password
        #[arg(long = "old")]
        old_password: String,

        /// New password
        #[arg(long = "new")]
        new_password: String,
    },
    /// Send an authenticated request and print the response envelope
    Request {
        /// HTTP method
        method: String,

        /// Path relative to the base URL, e.g. /api/student/courses
        path: String,

        /// Query parameter as key=value (repeatable)
        #[arg(short, long = "query", value_parser = parse_key_value)]
        query: Vec<(String, String)>,

        /// JSON request body
        #[arg(short, long)]
        body: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Generate a default configuration file
    Init {
        /// Output file path; the default is picked up by later runs
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        output: PathBuf,
    },
}

/// Written by `config init` and found by `GatewayConfig::load`
pub const DEFAULT_CONFIG_FILE: &str = "campus.json";

impl Commands {
    pub async fn execute(self, config: GatewayConfig) -> Result<()> {
        match self {
            Self::Config { action } => action.execute(),
            Self::Session(command) => {
                let gateway = SessionGateway::builder().config(config).build()?;
                gateway.subscribe(report_session_event);
                command.execute(&gateway).await
            }
        }
    }
}

impl SessionCommand {
    pub async fn execute(self, gateway: &SessionGateway) -> Result<()> {
        match self {
            Self::Login {
                role,
                username,
                password,
                remember,
                forget,
            } => login(gateway, role, username, password, remember, forget).await,
            Self::Logout => {
                gateway.logout();
                println!("Logged out");
                Ok(())
            }
            Self::Whoami => {
                whoami(gateway);
                Ok(())
            }
            Self::ResetPassword {
                old_password,
                new_password,
            } => {
                gateway.reset_password(&old_password, &new_password).await?;
                println!("Password changed");
                Ok(())
            }
            Self::Request {
                method,
                path,
                query,
                body,
            } => send_request(gateway, &method, path, query, body.as_deref()).await,
        }
    }
}

impl ConfigAction {
    pub fn execute(self) -> Result<()> {
        match self {
            Self::Init { output } => {
                info!("Generating default configuration");
                crate::config::generate_default_config(&output)?;
                println!("Configuration written to {}", output.display());
                Ok(())
            }
        }
    }
}

async fn login(
    gateway: &SessionGateway,
    role: Role,
    username: Option<String>,
    password: Option<String>,
    remember: bool,
    forget: bool,
) -> Result<()> {
    if forget {
        gateway.forget_login()?;
    }

    let remembered = gateway.remembered_login();
    let username = username
        .or_else(|| remembered.as_ref().map(|r| r.username.clone()))
        .ok_or_else(|| anyhow!("no username given and none remembered"))?;
    let password = match password {
        Some(password) => password,
        None => match remembered {
            Some(r) if r.username == username => r.password,
            _ => bail!("no password given for {username}"),
        },
    };

    gateway.login(role, &username, &password).await?;
    if remember {
        gateway.remember_login(&RememberedLogin {
            username: username.clone(),
            password,
        })?;
    }

    println!("Logged in as {username} ({role})");
    Ok(())
}

fn report_session_event(event: &SessionEvent) {
    match event {
        SessionEvent::Logout => eprintln!("Session ended"),
        SessionEvent::AuthError { message } => eprintln!("{message}"),
    }
}

fn whoami(gateway: &SessionGateway) {
    if !gateway.is_authenticated() {
        println!("Not logged in");
        return;
    }
    let username = gateway
        .current_username()
        .unwrap_or_else(|| "<unknown>".to_string());
    match gateway.current_role() {
        Some(role) => println!("{username} ({role})"),
        None => println!("{username}"),
    }
}

async fn send_request(
    gateway: &SessionGateway,
    method: &str,
    path: String,
    query: Vec<(String, String)>,
    body: Option<&str>,
) -> Result<()> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid HTTP method: {method}"))?;

    let mut request = ApiRequest::new(method, path);
    for (key, value) in query {
        request = request.query(key, value);
    }
    if let Some(body) = body {
        let value: serde_json::Value =
            serde_json::from_str(body).context("request body is not valid JSON")?;
        request = request.json_value(value);
    }

    let response = gateway.request(request).await?;
    println!("{}", serde_json::to_string_pretty(&response.envelope)?);
    Ok(())
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got `{s}`"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_pairs() {
        assert_eq!(
            parse_key_value("page=2").unwrap(),
            ("page".to_string(), "2".to_string())
        );
        assert_eq!(
            parse_key_value("q=a=b").unwrap(),
            ("q".to_string(), "a=b".to_string())
        );
        assert!(parse_key_value("page").is_err());
    }

    #[test]
    fn default_config_file_is_probed_on_load() {
        assert!(campus_session::config::CONFIG_FILES.contains(&DEFAULT_CONFIG_FILE));
    }
}
