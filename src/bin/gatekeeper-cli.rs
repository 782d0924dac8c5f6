use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "gatekeeper-cli")]
#[command(about = "Command-line client for the Gatekeeper API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:4000")]
    url: String,

    /// Bearer token for authenticated calls.
    #[arg(short, long, env = "GATEKEEPER_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Activate an account with the token from the welcome message
    Activate {
        #[arg(long)]
        activation_token: String,
    },
    /// Exchange credentials for a bearer token
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Check service status (requires an activated account)
    Health,
    /// Fetch a movie by id
    Movie { id: i64 },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    if let Some(token) = &cli.token {
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}"))?);
    }

    let res = match cli.command {
        Commands::Register { name, email, password } => {
            client
                .post(format!("{}/v1/users", cli.url))
                .json(&json!({ "name": name, "email": email, "password": password }))
                .send()
                .await?
        }
        Commands::Activate { activation_token } => {
            client
                .put(format!("{}/v1/users/activate", cli.url))
                .json(&json!({ "token": activation_token }))
                .send()
                .await?
        }
        Commands::Login { email, password } => {
            client
                .put(format!("{}/v1/users/auth", cli.url))
                .json(&json!({ "email": email, "password": password }))
                .send()
                .await?
        }
        Commands::Health => {
            client
                .get(format!("{}/v1/healthcheck", cli.url))
                .headers(headers)
                .send()
                .await?
        }
        Commands::Movie { id } => {
            client
                .get(format!("{}/v1/movies/{id}", cli.url))
                .headers(headers)
                .send()
                .await?
        }
    };
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: API returned status {}", status);
        if !text.is_empty() {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }
    if text.is_empty() {
        println!("{}", status);
        return Ok(());
    }

    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
