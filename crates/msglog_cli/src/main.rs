//! msglog CLI
//!
//! Command-line tools for the message logger.
//!
//! # Commands
//!
//! - `collect` - Run a collector writing to a log directory
//! - `cat` - Query a user's log
//! - `users`, `strings`, `hostnames`, `components`, `categories` - List registries
//! - `inspect` - Show segments and active files
//! - `roll` - Close every active segment
//! - `send` - Send one message to a collector

mod commands;

use clap::{Args, Parser, Subcommand, ValueEnum};
use commands::OutputFormat;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Message logger collector and query tools.
#[derive(Parser)]
#[command(name = "msglog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the log directory
    #[arg(global = true, short = 'd', long)]
    logdir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a collector until interrupted
    Collect {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// TCP listen address (overrides the configuration file)
        #[arg(long)]
        tcp: Option<SocketAddr>,

        /// UDP listen address (overrides the configuration file)
        #[arg(long)]
        udp: Option<SocketAddr>,

        /// Segment size in MiB (overrides the configuration file)
        #[arg(long)]
        segment_size_mb: Option<u64>,
    },

    /// Query a user's log
    Cat(CatArgs),

    /// List users with logs
    Users {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// List format strings
    Strings {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// List known hosts
    Hostnames {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// List the components that wrote to a user's log
    Components {
        /// User id
        #[arg(short, long)]
        uid: Option<u16>,

        /// User name
        #[arg(long, conflicts_with = "uid")]
        user: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// List categories
    Categories {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show segments, active files and the lock owner
    Inspect {
        /// Only this user
        #[arg(short, long)]
        uid: Option<u16>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Close every active segment (fails while a collector runs)
    Roll {
        /// Remove a lock left behind by a dead process first
        #[arg(long)]
        clear_stale_lock: bool,
    },

    /// Send one message to a collector
    Send(SendArgs),

    /// Show version information
    Version,
}

/// Arguments of `msglog cat`.
#[derive(Args)]
pub struct CatArgs {
    /// User id
    #[arg(short, long)]
    pub uid: Option<u16>,

    /// User name
    #[arg(long, conflicts_with = "uid")]
    pub user: Option<String>,

    /// Start time: seconds since the epoch or "YYYY-MM-DD HH:MM:SS" local
    #[arg(long)]
    pub from: Option<String>,

    /// End time, same forms as --from
    #[arg(long)]
    pub to: Option<String>,

    /// Start at this entry address (SUFFIX:INDEX)
    #[arg(long, conflicts_with = "from")]
    pub from_address: Option<String>,

    /// End at this entry address (SUFFIX:INDEX)
    #[arg(long, conflicts_with = "to")]
    pub to_address: Option<String>,

    /// Period around the start: "+N", "-N", "N" seconds, "to beginning" or "to present"
    #[arg(long, conflicts_with_all = ["to", "to_address"])]
    pub period: Option<String>,

    /// Newest entries first
    #[arg(short, long)]
    pub backwards: bool,

    /// Only this host (name or dotted address)
    #[arg(long)]
    pub host: Option<String>,

    /// Only this process id
    #[arg(long)]
    pub pid: Option<u32>,

    /// Only this app instance id
    #[arg(long)]
    pub app_id: Option<u32>,

    /// Invert --host, --pid and --app-id
    #[arg(long)]
    pub negate: bool,

    /// Only these component names (repeatable)
    #[arg(long = "component")]
    pub components: Vec<String>,

    /// Only these severities, e.g. ERROR (repeatable)
    #[arg(short, long = "severity")]
    pub severities: Vec<String>,

    /// Only these categories (repeatable)
    #[arg(long = "category")]
    pub categories: Vec<String>,

    /// Only script messages
    #[arg(long, conflicts_with = "native_only")]
    pub script_only: bool,

    /// Only native messages
    #[arg(long)]
    pub native_only: bool,

    /// Only messages matching this regex
    #[arg(short, long)]
    pub include: Option<String>,

    /// Drop messages matching this regex
    #[arg(short = 'x', long)]
    pub exclude: Option<String>,

    /// Case-insensitive --include and --exclude
    #[arg(long)]
    pub ignore_case: bool,

    /// When to interpolate arguments relative to regex matching
    #[arg(long, value_enum, default_value_t = InterpolateArg::Pre)]
    pub interpolate: InterpolateArg,

    /// Lines of context around each match
    #[arg(short = 'C', long, default_value_t = 0)]
    pub context: usize,

    /// Keep waiting for new entries
    #[arg(long)]
    pub follow: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

/// Interpolation modes for `msglog cat`.
#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InterpolateArg {
    /// Match regexes against the interpolated text
    Pre,
    /// Match against the raw format string, print interpolated text
    Post,
    /// Never interpolate
    Dont,
}

/// Arguments of `msglog send`.
#[derive(Args)]
pub struct SendArgs {
    /// Collector TCP address
    #[arg(short, long)]
    pub collector: SocketAddr,

    /// Component name to register as
    #[arg(long, default_value = "msglog")]
    pub component: String,

    /// App instance id to announce
    #[arg(long)]
    pub app_id: Option<u32>,

    /// User id to log as (defaults to the current user)
    #[arg(short, long)]
    pub uid: Option<u16>,

    /// Severity
    #[arg(short, long, default_value = "INFO")]
    pub severity: String,

    /// Category
    #[arg(long, default_value = "")]
    pub category: String,

    /// printf-style format string
    pub format_string: String,

    /// Arguments, converted according to the format string
    pub args: Vec<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Collect {
            config,
            tcp,
            udp,
            segment_size_mb,
        } => {
            commands::collect::run(cli.logdir, config, tcp, udp, segment_size_mb)?;
        }
        Commands::Cat(args) => {
            let logdir = cli.logdir.ok_or("Log directory required for cat")?;
            commands::cat::run(&logdir, &args)?;
        }
        Commands::Users { format } => {
            let logdir = cli.logdir.ok_or("Log directory required for users")?;
            commands::registry::users(&logdir, format)?;
        }
        Commands::Strings { format } => {
            let logdir = cli.logdir.ok_or("Log directory required for strings")?;
            commands::registry::strings(&logdir, format)?;
        }
        Commands::Hostnames { format } => {
            let logdir = cli.logdir.ok_or("Log directory required for hostnames")?;
            commands::registry::hostnames(&logdir, format)?;
        }
        Commands::Components { uid, user, format } => {
            let logdir = cli.logdir.ok_or("Log directory required for components")?;
            commands::registry::components(&logdir, uid, user.as_deref(), format)?;
        }
        Commands::Categories { format } => {
            let logdir = cli.logdir.ok_or("Log directory required for categories")?;
            commands::registry::categories(&logdir, format)?;
        }
        Commands::Inspect { uid, format } => {
            let logdir = cli.logdir.ok_or("Log directory required for inspect")?;
            commands::inspect::run(&logdir, uid, format)?;
        }
        Commands::Roll { clear_stale_lock } => {
            let logdir = cli.logdir.ok_or("Log directory required for roll")?;
            commands::roll::run(&logdir, clear_stale_lock)?;
        }
        Commands::Send(args) => {
            commands::send::run(&args)?;
        }
        Commands::Version => {
            println!("msglog v{}", env!("CARGO_PKG_VERSION"));
            println!("log format version {}", msglog_core::LOG_FORMAT_VERSION);
            println!("protocol version {}", msglog_protocol::ProtocolVersion::CURRENT);
        }
    }

    Ok(())
}
