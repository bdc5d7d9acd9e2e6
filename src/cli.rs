use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "reindexer",
    about = "Rebuild the fulltext index of a whole document repository"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Act as this user (defaults to $REINDEXER_USER)
    #[arg(short, long, global = true)]
    pub user: Option<String>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Touch every live document and re-run fulltext extraction in batches
    Reindex(ReindexArgs),
    /// Load documents from a JSON Lines file
    Import(ImportArgs),
    /// Set a text attribute on a document (versions are refused)
    Set(SetArgs),
    /// Manage users allowed to act on the repository
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Manage which document types are fulltext indexed
    Fulltext {
        #[command(subcommand)]
        action: FulltextAction,
    },
    /// Show or change repository settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Search the fulltext index
    Search(SearchArgs),
    /// Show repository status and statistics
    Status(StatusArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Reindex --

#[derive(Debug, Parser)]
pub struct ReindexArgs {
    /// Documents per batch; zero or negative uses the default of 100
    #[arg(long, default_value = "100", allow_negative_numbers = true)]
    pub batch_size: i64,

    /// Run only this 1-based batch; out of range runs all batches
    #[arg(long, default_value = "0", allow_negative_numbers = true)]
    pub batch: i64,

    /// Repository name reported in indexing requests
    #[arg(long)]
    pub repository: Option<String>,

    /// Fulltext extraction worker threads
    #[arg(short, long, default_value = "2")]
    pub workers: usize,
}

// -- Import --

#[derive(Debug, Parser)]
pub struct ImportArgs {
    /// JSON Lines file, one document per line
    pub file: PathBuf,
}

// -- Set --

#[derive(Debug, Parser)]
pub struct SetArgs {
    /// Document id
    pub id: String,
    /// Attribute name, e.g. dc:title
    pub attribute: String,
    pub value: String,
}

// -- User subcommands --

#[derive(Debug, Subcommand)]
pub enum UserAction {
    /// Register a user, or change an existing user's role
    Add {
        name: String,
        /// Grant administrator rights
        #[arg(long)]
        admin: bool,
    },
    /// Remove a user
    Remove { name: String },
    /// List registered users
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

// -- Fulltext subcommands --

#[derive(Debug, Subcommand)]
pub enum FulltextAction {
    /// Show the fulltext configuration
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Index only the listed types (repeatable)
    Include { doc_type: String },
    /// Never index this type
    Exclude { doc_type: String },
    /// Index every type again
    Reset,
}

// -- Config subcommands --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show the effective settings
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a setting
    Set { key: String, value: String },
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "10")]
    pub count: usize,

    /// Search only documents of this type
    #[arg(short = 't', long = "type")]
    pub doc_type: Option<String>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "reindexer",
            &mut std::io::stdout(),
        );
    }
}
