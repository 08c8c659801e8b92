mod commands;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use trellis_core::{MonitorId, Rect, Request, WindowId, WorkspaceId};

#[derive(Parser)]
#[command(
    name = "trellis",
    version,
    about = "A window relay daemon that tiles windows across processes"
)]
struct Cli {
    /// Use this configuration file instead of ~/.config/trellis/config.toml
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon in the background
    Start,
    /// Stop the running daemon
    Stop,
    /// Show daemon status, sessions and workspace health
    Status,
    /// List the windows of a workspace
    Query {
        workspace: u32,
        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },
    /// Send a window command to the daemon
    Command {
        #[command(subcommand)]
        command: WindowCommands,
    },
    /// Report a changed monitor geometry
    Monitor {
        monitor: u32,
        #[command(flatten)]
        rect: RectArgs,
    },
    /// Run an in-process observer with simulated windows
    Simulate(commands::simulate::SimulateArgs),
    /// Run the daemon in the foreground
    Daemon,
}

#[derive(Subcommand)]
enum WindowCommands {
    /// Give a window keyboard focus
    Focus { window: WindowId },
    /// Ask a window to close
    Close { window: WindowId },
    /// Place a window at an explicit position (it stops being tiled)
    Move {
        window: WindowId,
        #[command(flatten)]
        rect: RectArgs,
    },
    /// Resize a window, keeping its top-left corner
    Resize {
        window: WindowId,
        width: i32,
        height: i32,
    },
    /// Move a window to another workspace
    Reparent { window: WindowId, workspace: u32 },
}

#[derive(Args)]
struct RectArgs {
    x: i32,
    y: i32,
    width: i32,
    height: i32,
}

impl From<RectArgs> for Rect {
    fn from(r: RectArgs) -> Self {
        Rect::new(r.x, r.y, r.width, r.height)
    }
}

fn request(command: WindowCommands) -> Request {
    match command {
        WindowCommands::Focus { window } => Request::Focus { window },
        WindowCommands::Close { window } => Request::Close { window },
        WindowCommands::Move { window, rect } => Request::Move {
            window,
            rect: rect.into(),
        },
        WindowCommands::Resize {
            window,
            width,
            height,
        } => Request::Resize {
            window,
            width,
            height,
        },
        WindowCommands::Reparent { window, workspace } => Request::Reparent {
            window,
            workspace: WorkspaceId(workspace),
        },
    }
}

fn main() {
    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref());

    match cli.command {
        Commands::Start => commands::start::execute(cli.config.as_deref(), &config),
        Commands::Stop => commands::stop::execute(&config),
        Commands::Status => commands::status::execute(&config),
        Commands::Query { workspace, json } => {
            commands::query::execute(&config, WorkspaceId(workspace), json)
        }
        Commands::Command { command } => commands::command::execute(&config, request(command)),
        Commands::Monitor { monitor, rect } => commands::command::execute(
            &config,
            Request::Monitor {
                monitor: MonitorId(monitor),
                rect: rect.into(),
            },
        ),
        Commands::Simulate(args) => commands::simulate::execute(&config, &args),
        Commands::Daemon => commands::daemon::execute(&config),
    }
}
