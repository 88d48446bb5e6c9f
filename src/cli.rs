use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tsgate",
    about = "Token-scoped CRUD API over MongoDB time-series collections",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server.
    Serve {
        /// Listen port; overrides TSGATE_PORT.
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Manage API tokens directly against the store.
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Issue a token scoped to one database. Prints the secret once.
    Create {
        #[arg(long)]
        database: String,
        #[arg(long)]
        description: Option<String>,
        /// TTL in seconds; 0 or omitted means the token never expires.
        #[arg(long)]
        expires_in: Option<i64>,
    },
    /// List token metadata, optionally for a single database.
    List {
        #[arg(long)]
        database: Option<String>,
    },
    /// Delete a token by database and identifier.
    Revoke {
        #[arg(long)]
        database: String,
        #[arg(long)]
        token_id: String,
    },
}
