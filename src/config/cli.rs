use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the moodfeed binary.
#[derive(Debug, Parser)]
#[command(
    name = "moodfeed",
    version,
    about = "Affinity-ranked feeds over a local dataset"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "MOODFEED_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the directory holding profiles and client cache entries.
    #[arg(long = "data-dir", value_name = "PATH", value_hint = ValueHint::DirPath, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Toggle the server cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub cache_enabled: Option<bool>,

    /// Override the minimum view duration that counts as engagement.
    #[arg(long = "min-view-seconds", value_name = "SECONDS", global = true)]
    pub min_view_seconds: Option<f64>,

    /// Override the maximum number of trending items.
    #[arg(long = "trending-limit", value_name = "COUNT", global = true)]
    pub trending_limit: Option<usize>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Rank a dataset into a feed for one viewer.
    Rank(RankArgs),
    /// Record an engagement event against a viewer's profile.
    Record(RecordArgs),
    /// Inspect or reset a viewer's affinity profile.
    Profile(ProfileArgs),
    /// Inspect or purge the persistent client cache.
    #[command(name = "client-cache")]
    ClientCache(ClientCacheArgs),
}

#[derive(Debug, Args, Clone)]
pub struct DatasetArg {
    /// JSON dataset with items, daily statistics and saved items.
    #[arg(long = "dataset", value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub dataset: PathBuf,
}

#[derive(Debug, Args, Clone)]
pub struct RankArgs {
    #[command(flatten)]
    pub dataset: DatasetArg,

    /// Feed mode (all, same-affinity, trending, own, personalized).
    #[arg(long, default_value = "all")]
    pub mode: String,

    /// Viewer id; required for own, same-affinity exclusion and personalized.
    #[arg(long, value_name = "USER")]
    pub viewer: Option<i64>,

    /// Recent categories for same-affinity mode; repeatable.
    #[arg(long = "recent", value_name = "CATEGORY")]
    pub recent: Vec<String>,

    #[arg(long, default_value_t = 1)]
    pub page: u32,

    #[arg(long, default_value_t = 20)]
    pub limit: u32,

    /// Reference time (RFC 3339); defaults to now.
    #[arg(long, value_name = "TIMESTAMP")]
    pub now: Option<String>,

    /// Fold the dataset's statistics and saved items into the profile first.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub refresh_profile: bool,

    /// Print scores alongside items.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub scores: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SignalArg {
    View,
    Endorse,
    Save,
}

#[derive(Debug, Args, Clone)]
pub struct RecordArgs {
    #[command(flatten)]
    pub dataset: DatasetArg,

    #[arg(long, value_name = "USER")]
    pub user: i64,

    #[arg(long, value_name = "ITEM")]
    pub item: i64,

    #[arg(long, value_enum)]
    pub signal: SignalArg,

    /// View duration; only used with `--signal view`.
    #[arg(long, value_name = "SECONDS", default_value_t = 0.0)]
    pub seconds: f64,
}

#[derive(Debug, Args, Clone)]
pub struct ProfileArgs {
    #[command(subcommand)]
    pub command: ProfileCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum ProfileCommand {
    /// Print the stored profile.
    Show(UserArg),
    /// Delete the stored profile.
    Reset(UserArg),
    /// Fold a dataset's statistics and saved items into the profile.
    Refresh(RefreshArgs),
}

#[derive(Debug, Args, Clone)]
pub struct UserArg {
    #[arg(long, value_name = "USER")]
    pub user: i64,
}

#[derive(Debug, Args, Clone)]
pub struct RefreshArgs {
    #[arg(long, value_name = "USER")]
    pub user: i64,

    #[command(flatten)]
    pub dataset: DatasetArg,

    /// Last day of the statistics window (YYYY-MM-DD); defaults to today.
    #[arg(long, value_name = "DATE")]
    pub today: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct ClientCacheArgs {
    #[command(subcommand)]
    pub command: ClientCacheCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum ClientCacheCommand {
    /// Print the total stored bytes.
    Size,
    /// Remove every entry in the cache namespace.
    Clear,
    /// Remove entries whose key contains the fragment.
    Purge {
        #[arg(value_name = "FRAGMENT")]
        fragment: String,
    },
}
