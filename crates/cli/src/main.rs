//! Millikit CLI - Database migrations and management tools.
//!
//! # Usage
//!
//! ```bash
//! # Run database migrations
//! mk-cli migrate
//!
//! # Check database configuration and connectivity
//! mk-cli check-db
//!
//! # Create a user (add --admin for catalog management)
//! mk-cli user create -u miller -p 'correct horse battery' --admin
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `check-db` - Report connection variables, server time and catalog size
//! - `user create` - Create users

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "mk-cli")]
#[command(author, version, about = "Millikit CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Check database configuration and connectivity
    CheckDb,
    /// Manage users
    User {
        #[command(subcommand)]
        action: UserAction,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a new user
    Create {
        /// Login name
        #[arg(short, long)]
        username: String,

        /// Password (at least 8 characters)
        #[arg(short, long)]
        password: String,

        /// Grant admin rights
        #[arg(long)]
        admin: bool,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::CheckDb => commands::check_db::run().await?,
        Commands::User { action } => match action {
            UserAction::Create {
                username,
                password,
                admin,
            } => {
                commands::user::create(&username, &password, admin).await?;
            }
        },
    }
    Ok(())
}
