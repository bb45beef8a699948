mod cmd_feedback;
mod cmd_insights;
mod cmd_run;
mod cmd_serve;
mod config;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::AppConfig;

#[derive(Parser)]
#[command(
    name = "shipcast",
    version,
    about = "Turn repository activity into autonomously-posted social updates"
)]
struct Cli {
    /// Path to config.yaml (default: ~/.config/shipcast/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the content pipeline once for a repository
    Run {
        /// Local repository path or remote URL
        target: String,
        /// Commit, branch, or tag to analyze
        #[arg(long = "ref")]
        git_ref: Option<String>,
        /// Pipeline mode: test, confirm, or auto (default from config)
        #[arg(long)]
        mode: Option<String>,
        /// Fixed selection seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,
        /// Stay alive until the scheduled follow-up fires
        #[arg(long)]
        await_amplify: bool,
    },
    /// Show learning insights
    Insights,
    /// Record engagement for a post
    Feedback {
        /// Post record id (printed by `run`)
        post_id: String,
        #[arg(long, default_value_t = 0)]
        likes: u64,
        #[arg(long, default_value_t = 0)]
        reposts: u64,
        #[arg(long, default_value_t = 0)]
        replies: u64,
        #[arg(long, default_value_t = 0)]
        views: u64,
    },
    /// Start the GitHub webhook listener
    Serve {
        /// Bind address (default from config)
        #[arg(long)]
        bind: Option<String>,
        /// Port (default from config)
        #[arg(long)]
        port: Option<u16>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.cmd {
        Command::Run {
            target,
            git_ref,
            mode,
            seed,
            await_amplify,
        } => cmd_run::execute(
            &config,
            cmd_run::RunParams {
                target,
                git_ref,
                mode,
                seed,
                await_amplify,
            },
        ),
        Command::Insights => cmd_insights::execute(&config),
        Command::Feedback {
            post_id,
            likes,
            reposts,
            replies,
            views,
        } => cmd_feedback::execute(
            &config,
            cmd_feedback::FeedbackParams {
                post_id,
                likes,
                reposts,
                replies,
                views,
            },
        ),
        Command::Serve { bind, port } => cmd_serve::execute(&config, bind, port),
    }
}
