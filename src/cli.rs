use clap::{Parser, Subcommand};

/// SkillSwap notifications: sync and manage a user's notifications
#[derive(Parser)]
#[command(name = "skillswap-notify", version, about)]
pub struct Cli {
    /// User id the session runs as
    #[arg(long, global = true, env = "SKILLSWAP_USER_ID")]
    pub user_id: Option<String>,

    /// Bearer token for the REST API and push channel
    #[arg(long, global = true, env = "SKILLSWAP_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Open a live session: print the first page, then every push until Ctrl-C
    Watch,

    /// Print one page of notifications
    List {
        #[arg(short, long, default_value = "1")]
        page: u32,
        /// Page size (defaults to SKILLSWAP_PAGE_SIZE)
        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Print the unread total
    Unread,

    /// Mark one notification as read
    Read { id: String },

    /// Mark every notification as read
    ReadAll,

    /// Delete a notification
    Delete { id: String },
}
