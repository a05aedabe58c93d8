use clap::{Parser, Subcommand};
use reqwest::header::AUTHORIZATION;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "storefront-cli")]
#[command(about = "Command-line client for the storefront API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:5000")]
    url: String,

    /// Bearer token for protected endpoints (see `login`).
    #[arg(short, long, env = "STOREFRONT_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Exchange credentials for a token
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Create an account
    Register {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// List registered users
    Users,
    /// List the product catalogue
    Products,
    /// Show the identity behind the token
    Protected,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let request = match &cli.command {
        Commands::Login { email, password } => client
            .post(format!("{}/api/login", cli.url))
            .json(&json!({ "email": email, "password": password })),
        Commands::Register {
            username,
            email,
            password,
        } => client
            .post(format!("{}/api/users", cli.url))
            .json(&json!({ "username": username, "email": email, "password": password })),
        Commands::Users => client.get(format!("{}/api/users", cli.url)),
        Commands::Products => client.get(format!("{}/api/products", cli.url)),
        Commands::Protected => client.get(format!("{}/api/protected", cli.url)),
    };

    let request = match &cli.token {
        Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
        None => request,
    };

    print_response(request.send().await?).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;

    if !status.is_success() {
        eprintln!("Error: API returned status {}", status);
        eprintln!("Response: {}", text);
        std::process::exit(1);
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
