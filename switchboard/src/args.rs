use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Switchboard chat completion gateway
#[derive(Debug, Parser)]
#[command(name = "switchboard", about = "Dispatch chat completions to OpenAI, Azure, DeepSeek, Claude, Gemini and Bedrock")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "switchboard.toml", env = "SWITCHBOARD_CONFIG", global = true)]
    pub config: PathBuf,

    /// Credential environment, overriding the config file and `SWITCHBOARD_ENV`
    #[arg(short, long, global = true)]
    pub environment: Option<String>,

    /// Log filter directive
    #[arg(long, default_value = "info", env = "SWITCHBOARD_LOG", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Encrypt secrets for a credential file, printing one ciphertext per line
    Encrypt {
        #[arg(required = true)]
        plaintext: Vec<String>,
    },
    /// Dispatch a canonical JSON chat request
    Chat {
        /// Request file, or `-` for stdin
        #[arg(short, long, default_value = "-")]
        request: PathBuf,
    },
}
