use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use reqwest::Method;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use session_gateway::gateway::{ApiGateway, AuthSeed, GatewayConfig};
use session_gateway::transport::{path, ApiRequest, RequestOptions};
use session_gateway::utils::logging;

const DEFAULT_SESSION_DIR: &str = ".gateway-session";

#[derive(Parser)]
#[command(name = "gateway", version, about = "Authenticated API gateway client")]
struct AppCli {
    /// Config file path
    #[arg(short, long, default_value = "gateway.json", global = true)]
    config: String,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone, Copy)]
struct AccessFlags {
    /// Public endpoint: never send the access token
    #[arg(long, conflicts_with = "hybrid")]
    public: bool,
    /// Hybrid endpoint: send the access token only if one is stored
    #[arg(long)]
    hybrid: bool,
}

impl AccessFlags {
    fn options(self) -> RequestOptions {
        if self.public {
            RequestOptions::public()
        } else if self.hybrid {
            RequestOptions::hybrid()
        } else {
            RequestOptions::private()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// GET a resource
    Get {
        path: String,
        #[command(flatten)]
        access: AccessFlags,
    },
    /// DELETE a resource
    Delete {
        path: String,
        #[command(flatten)]
        access: AccessFlags,
    },
    /// POST a JSON body
    Post {
        path: String,
        #[arg(long)]
        data: Option<String>,
        #[command(flatten)]
        access: AccessFlags,
    },
    /// PUT a JSON body
    Put {
        path: String,
        #[arg(long)]
        data: Option<String>,
        #[command(flatten)]
        access: AccessFlags,
    },
    /// PATCH a JSON body
    Patch {
        path: String,
        #[arg(long)]
        data: Option<String>,
        #[command(flatten)]
        access: AccessFlags,
    },
    /// Seed the session with tokens obtained elsewhere
    Login {
        #[arg(long)]
        access: String,
        #[arg(long)]
        refresh: Option<String>,
        /// Cached user profile as JSON
        #[arg(long)]
        user: Option<String>,
    },
    /// Clear the stored session
    Logout,
    /// Show the cached user and which tokens are stored
    Whoami,
    /// Print the canonical form of a path
    Normalize {
        path: String,
        #[arg(long, default_value = "/api")]
        api_base: String,
    },
}

fn load_config(path: &str) -> Result<GatewayConfig> {
    let cfg = if Path::new(path).exists() {
        GatewayConfig::from_file(path)?
    } else {
        let base_url = std::env::var("GATEWAY_BASE_URL")
            .with_context(|| format!("no config at {path} and GATEWAY_BASE_URL unset"))?;
        GatewayConfig::new(base_url)
    };
    let mut cfg = cfg.apply_env();
    if cfg.session_dir.is_none() {
        cfg.session_dir = Some(PathBuf::from(DEFAULT_SESSION_DIR));
    }
    Ok(cfg)
}

fn parse_body(data: Option<String>) -> Result<Option<Value>> {
    data.map(|raw| serde_json::from_str(&raw).context("parsing --data as JSON"))
        .transpose()
}

fn build_request(
    method: Method,
    path: String,
    access: AccessFlags,
    data: Option<String>,
) -> Result<ApiRequest> {
    let mut request = ApiRequest::new(method, path).with_options(access.options());
    request.body = parse_body(data)?;
    Ok(request)
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn send(gateway: &ApiGateway, request: ApiRequest) -> Result<()> {
    let outcome = gateway.request(request).await;
    debug!(diagnostics = ?gateway.diagnostics(), "request finished");
    let response = outcome?;
    print_json(&response.body)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = AppCli::parse();
    logging::init(if args.verbose { "debug" } else { "warn" });

    if let Commands::Normalize { path, api_base } = &args.command {
        println!("{}", path::normalize(api_base, path));
        return Ok(());
    }

    let config = load_config(&args.config)?;
    info!(base_url = %config.base_url, "gateway configured");
    let gateway = ApiGateway::from_config(config)?;

    match args.command {
        Commands::Get { path, access } => {
            send(&gateway, build_request(Method::GET, path, access, None)?).await?
        }
        Commands::Delete { path, access } => {
            send(&gateway, build_request(Method::DELETE, path, access, None)?).await?
        }
        Commands::Post { path, data, access } => {
            send(&gateway, build_request(Method::POST, path, access, data)?).await?
        }
        Commands::Put { path, data, access } => {
            send(&gateway, build_request(Method::PUT, path, access, data)?).await?
        }
        Commands::Patch { path, data, access } => {
            send(&gateway, build_request(Method::PATCH, path, access, data)?).await?
        }
        Commands::Login { access, refresh, user } => {
            let user = parse_body(user).context("parsing --user")?;
            gateway.set_auth(AuthSeed {
                access: Some(access),
                refresh,
                user,
            })?;
            println!("session stored");
        }
        Commands::Logout => {
            gateway.clear_auth()?;
            println!("session cleared");
        }
        Commands::Whoami => {
            let tokens = gateway.tokens();
            print_json(&serde_json::json!({
                "user": gateway.auth_user(),
                "has_access_token": tokens.access.is_some(),
                "has_refresh_token": tokens.refresh.is_some(),
            }))?;
        }
        // printed before the config was loaded
        Commands::Normalize { .. } => {}
    }

    Ok(())
}
