use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use plotter_cli::{commands, parse_param, CliCommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Device API base URL
    #[arg(long, global = true, env = plotter_config::BASE_URL_ENV)]
    base_url: Option<String>,
    /// Status poll interval in milliseconds
    #[arg(long, global = true)]
    interval_ms: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the device status once
    Status {
        #[arg(short, long, help = "Keep polling and print every change")]
        watch: bool,
    },
    /// Poll the device and print every change
    Watch {
        #[arg(short, long, help = "Also follow this project and its uploads")]
        project: Option<String>,
        #[arg(long, help = "Stop after this many seconds")]
        seconds: Option<u64>,
    },
    /// Send START, STOP or PAUSE
    #[command(alias = "cmd")]
    Command {
        #[arg(value_enum)]
        kind: CliCommand,
        #[arg(short, long, help = "Keep polling until the device confirms the command")]
        wait: bool,
    },
    /// Manage projects on the device
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Upload images to a project
    Upload {
        project: String,
        #[arg(required = true)]
        files: Vec<Utf8PathBuf>,
    },
}

#[derive(Subcommand)]
enum ProjectCommands {
    List,
    Show {
        id: String,
    },
    Create {
        name: String,
        #[arg(short, long = "param", value_parser = parse_param, help = "Parameter as key=value")]
        params: Vec<(String, serde_json::Value)>,
    },
    #[command(alias = "rm")]
    Delete {
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("default subscriber");

    let mut kernel = commands::connect(cli.base_url, cli.interval_ms)?;

    match cli.command {
        Commands::Status { watch: false } => {
            commands::cmd_status(&mut kernel).await?;
        }
        Commands::Status { watch: true } => {
            commands::cmd_watch(&mut kernel, None, None).await?;
        }
        Commands::Watch { project, seconds } => {
            commands::cmd_watch(&mut kernel, project, seconds.map(Duration::from_secs)).await?;
        }
        Commands::Command { kind, wait } => {
            commands::cmd_command(&mut kernel, kind.into(), wait).await?;
        }
        Commands::Project { command } => match command {
            ProjectCommands::List => {
                commands::cmd_project_list(&kernel).await?;
            }
            ProjectCommands::Show { id } => {
                commands::cmd_project_show(&mut kernel, &id).await?;
            }
            ProjectCommands::Create { name, params } => {
                commands::cmd_project_create(&kernel, name, params).await?;
            }
            ProjectCommands::Delete { id } => commands::cmd_project_delete(&kernel, &id).await?,
        },
        Commands::Upload { project, files } => {
            commands::cmd_upload(&mut kernel, &project, files).await?;
        }
    }

    Ok(())
}
