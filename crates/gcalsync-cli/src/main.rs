use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;
mod common;

#[derive(Parser)]
#[command(name = "gcalsync", version, about = "Mirror busy time between Google calendars")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register an account and its calendars, authorizing if needed
    Add {
        /// Local name for the Google account
        account_name: String,
        /// Calendars to register (defaults to "primary")
        calendar_ids: Vec<String>,
        /// Register only; authorize later on first sync
        #[arg(long)]
        no_auth: bool,
    },
    /// Show registered calendars, blocker counts and block policy
    List {
        #[arg(long)]
        json: bool,
    },
    /// Bring every calendar's blockers up to date
    Sync,
    /// Delete every blocker this tool created
    Desync,
    /// Show events of SOURCE in TARGET as "Busy" only
    Block {
        source_calendar_id: String,
        target_calendar_id: String,
    },
    /// Undo a block
    Unblock {
        source_calendar_id: String,
        target_calendar_id: String,
    },
    /// List block policy edges
    Blocks {
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("GCALSYNC_LOG")
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time(),
        )
        .init();
}

fn main() {
    init_tracing();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version print to stdout and succeed; bad usage exits 1.
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };
    let result = match cli.command {
        Commands::Add {
            account_name,
            calendar_ids,
            no_auth,
        } => commands::add::run(&account_name, calendar_ids, no_auth),
        Commands::List { json } => commands::list::run(json),
        Commands::Sync => commands::sync::run_sync(),
        Commands::Desync => commands::sync::run_desync(),
        Commands::Block {
            source_calendar_id,
            target_calendar_id,
        } => commands::block::block(&source_calendar_id, &target_calendar_id),
        Commands::Unblock {
            source_calendar_id,
            target_calendar_id,
        } => commands::block::unblock(&source_calendar_id, &target_calendar_id),
        Commands::Blocks { json } => commands::block::list(json),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}
