mod cli;

use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use clap::{Parser, Subcommand};
use log::{error, info};
use tokio_util::sync::CancellationToken;
use ubercms_core::kernel::bootstrap::Application;
use ubercms_core::kernel::error::Result;
use ubercms_core::plugin_system::{PluginFactories, PluginId, PluginManager, Transition};

/// UberCMS: plugin runtime administration
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Print "pong" and exit
    #[arg(long)]
    ping: bool,

    /// Data directory holding config/, plugins/ and the plugin tables
    #[arg(long, env = "UBERCMS_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage plugins
    Plugin {
        #[command(subcommand)]
        command: PluginCommand,
    },
    /// Dispatch a GET request and print the response
    Dispatch {
        /// Request target, e.g. /render?text=hello
        target: String,
    },
}

#[derive(Subcommand, Debug)]
enum PluginCommand {
    /// List stored plugins
    List {},
    /// Register the plugin in a directory containing plugin.json
    Add { dir: PathBuf },
    /// Install a plugin (id or title)
    Install { plugin: String },
    /// Enable an installed plugin
    Enable { plugin: String },
    /// Disable an enabled plugin
    Disable { plugin: String },
    /// Uninstall a disabled plugin
    Uninstall { plugin: String },
    /// Delete an uninstalled plugin and everything it owns
    Remove { plugin: String },
    /// Rebuild the handler cache from storage
    RebuildCache {},
    /// Reconcile the plugin directories with storage
    Reload {},
}

fn factories() -> PluginFactories {
    let mut factories = PluginFactories::new();
    core_errors::register(&mut factories);
    request_log::register(&mut factories);
    text_render::register(&mut factories);
    factories
}

/// Accept a plugin id or a case-insensitive title.
async fn resolve(app: &Application, key: &str) -> Result<PluginId> {
    if let Ok(id) = PluginId::from_str(key) {
        return Ok(id);
    }
    let descriptors = app.plugin_manager().descriptors().await?;
    descriptors
        .iter()
        .find(|d| d.title.eq_ignore_ascii_case(key.trim()))
        .map(|d| d.id())
        .ok_or_else(|| format!("No plugin with id or title '{}'", key).into())
}

async fn run_plugin_command(app: &mut Application, command: PluginCommand) -> Result<()> {
    app.initialize().await?;
    let manager = app.plugin_manager().clone();
    let cancel = CancellationToken::new();

    let verb = match &command {
        PluginCommand::Install { plugin } => Some((Transition::Install, plugin.clone())),
        PluginCommand::Enable { plugin } => Some((Transition::Enable, plugin.clone())),
        PluginCommand::Disable { plugin } => Some((Transition::Disable, plugin.clone())),
        PluginCommand::Uninstall { plugin } => Some((Transition::Uninstall, plugin.clone())),
        PluginCommand::Remove { plugin } => Some((Transition::Remove, plugin.clone())),
        _ => None,
    };
    if let Some((transition, key)) = verb {
        let id = resolve(app, &key).await?;
        let report = manager.transition(id, transition, &cancel).await?;
        print!("{}", cli::transition(&report));
        return Ok(());
    }

    match command {
        PluginCommand::List {} => {
            println!("Stored plugins:");
            print!("{}", cli::descriptors(&manager.descriptors().await?));
        }
        PluginCommand::Add { dir } => {
            let descriptor = manager.add_plugin_directory(&dir).await?;
            println!("Added plugin '{}' ({})", descriptor.title, descriptor.id());
        }
        PluginCommand::RebuildCache {} => {
            print!("{}", cli::rebuild(&manager.rebuild_handler_cache(&cancel).await?));
        }
        PluginCommand::Reload {} => {
            print!("{}", cli::reload(&manager.reload_plugins(&cancel).await?));
        }
        _ => {}
    }
    Ok(())
}

async fn run(args: CliArgs) -> Result<()> {
    println!("Initializing application...");
    let mut app = Application::new(&args.data_dir, factories())?;

    match args.command {
        Some(Commands::Plugin { command }) => run_plugin_command(&mut app, command).await?,
        Some(Commands::Dispatch { target }) => {
            app.start().await?;
            let (request, outcome) = app.dispatch(&target).await;
            print!("{}", cli::dispatch(&request, &outcome));
            app.shutdown().await?;
        }
        None => {
            app.start().await?;
            let enabled = app.plugin_manager().registry().snapshot().len();
            println!("{} plugins enabled; nothing to do without a command.", enabled);
            app.shutdown().await?;
        }
    }

    println!("Shutting down application...");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = CliArgs::parse();

    if args.ping {
        println!("pong");
        return ExitCode::SUCCESS;
    }

    info!("Using data directory {}", args.data_dir.display());
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
