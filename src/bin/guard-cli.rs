use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, SET_COOKIE};
use serde_json::Value;

use wizard_guard::clock::system_clock;
use wizard_guard::config::{load_config, GuardConfig};
use wizard_guard::security::context::X_USER_ID;
use wizard_guard::security::{
    FileOperation, FileType, SignedTokenOptions, SignedTokenService, SigningSecret,
};

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Management CLI for the wizard guard", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Configuration file for offline signing and verification.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Value sent as the trusted user id header.
    #[arg(long)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Issue a signed grant offline (secret from the environment)
    Sign {
        filename: String,
        #[arg(long, default_value = "upload")]
        operation: String,
        #[arg(long, default_value = "image")]
        file_type: String,
        #[arg(long)]
        expires_in_secs: Option<u64>,
    },
    /// Verify a signed token offline (secret from the environment)
    Verify { token: String },
    /// Fetch an anti-forgery token from a running server
    CsrfToken,
    /// Show guard store sizes and breaker states
    Status,
}

fn offline_service(cli: &Cli) -> Result<SignedTokenService, Box<dyn std::error::Error>> {
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    };
    let secret = SigningSecret::from_env(&config.signed_tokens.secret_env)?;
    Ok(SignedTokenService::new(
        &secret,
        config.signed_tokens,
        system_clock(),
    )?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut headers = HeaderMap::new();
    if let Some(user) = &cli.user {
        headers.insert(X_USER_ID, HeaderValue::from_str(user)?);
    }

    match &cli.command {
        Commands::Sign {
            filename,
            operation,
            file_type,
            expires_in_secs,
        } => {
            let operation = FileOperation::parse(operation)
                .ok_or_else(|| format!("unknown operation: {operation}"))?;
            let file_type = FileType::parse(file_type)
                .ok_or_else(|| format!("unknown file type: {file_type}"))?;

            let mut options = SignedTokenOptions::new(operation, file_type);
            if let Some(secs) = expires_in_secs {
                options = options.expires_in(Duration::from_secs(*secs));
            }
            if let Some(user) = &cli.user {
                options = options.user(user.clone());
            }

            let grant = offline_service(&cli)?.generate_signed_token(filename, &options)?;
            println!("{}", serde_json::to_string_pretty(&grant)?);
        }
        Commands::Verify { token } => match offline_service(&cli)?.verify_signed_token(token) {
            Ok(payload) => println!("{}", serde_json::to_string_pretty(&payload)?),
            Err(rejection) => {
                eprintln!("Invalid: {rejection}");
                std::process::exit(1);
            }
        },
        Commands::CsrfToken => {
            let client = reqwest::Client::new();
            let res = client
                .get(format!("{}/api/csrf-token", cli.url))
                .headers(headers)
                .send()
                .await?;
            if let Some(cookie) = res.headers().get(SET_COOKIE) {
                eprintln!("Set-Cookie: {}", cookie.to_str().unwrap_or("<binary>"));
            }
            print_response(res).await?;
        }
        Commands::Status => {
            let client = reqwest::Client::new();
            let res = client
                .get(format!("{}/api/guard/status", cli.url))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: guard returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
