use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "ovl",
    about = "Overlay commit-merge engine for filesystem trees",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a new repository
    Init(InitArgs),
    /// Commit a directory to a branch
    Commit(CommitArgs),
    /// Check a commit out into a directory
    Checkout(CheckoutArgs),
    /// Resolve a branch or commit id
    RevParse(RevParseArgs),
    /// List a directory of a commit
    Ls(LsArgs),
    /// List branches
    Branches(RepoArgs),
    /// Merge changes directories onto a base and commit the result
    Union(UnionArgs),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init(_) => "init",
            Self::Commit(_) => "commit",
            Self::Checkout(_) => "checkout",
            Self::RevParse(_) => "rev-parse",
            Self::Ls(_) => "ls",
            Self::Branches(_) => "branches",
            Self::Union(_) => "union",
        }
    }
}

#[derive(Args)]
pub struct RepoArgs {
    /// Repository directory
    #[arg(long)]
    pub repo: PathBuf,
}

#[derive(Args)]
pub struct InitArgs {
    pub path: PathBuf,
    /// Store objects uncompressed
    #[arg(long)]
    pub bare: bool,
}

#[derive(Args)]
pub struct CommitArgs {
    #[command(flatten)]
    pub repo: RepoArgs,
    #[arg(short, long)]
    pub branch: String,
    pub dir: PathBuf,
    #[arg(long)]
    pub subject: Option<String>,
    #[arg(long)]
    pub body: Option<String>,
}

#[derive(Args)]
pub struct CheckoutArgs {
    #[command(flatten)]
    pub repo: RepoArgs,
    pub rev: String,
    /// Existing target directory
    pub dir: PathBuf,
    /// Apply whiteouts instead of writing them out
    #[arg(long)]
    pub whiteouts: bool,
}

#[derive(Args)]
pub struct RevParseArgs {
    #[command(flatten)]
    pub repo: RepoArgs,
    pub rev: String,
}

#[derive(Args)]
pub struct LsArgs {
    #[command(flatten)]
    pub repo: RepoArgs,
    pub rev: String,
    #[arg(default_value = "/")]
    pub path: String,
    /// List recursively
    #[arg(short = 'R', long)]
    pub recursive: bool,
}

#[derive(Args)]
pub struct UnionArgs {
    #[command(flatten)]
    pub repo: RepoArgs,
    /// Scratch root; its changes, splash, dt and kernel subdirectories are
    /// merged first, in that order, when present
    #[arg(long, default_value = ".")]
    pub storage: PathBuf,
    /// Base branch or commit id
    #[arg(long, default_value = "base")]
    pub base: String,
    /// Additional changes directory, applied in order
    #[arg(long = "changes-directory")]
    pub changes_dirs: Vec<PathBuf>,
    /// Commit subject; defaults to "ovl union <timestamp>"
    #[arg(long)]
    pub subject: Option<String>,
    #[arg(long)]
    pub body: Option<String>,
    /// Branch to commit the result to
    pub branch: String,
}
