use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use binreg::cache::Cache;
use binreg::config::{BackendKind, ConfigLoader, RemoteSpec};
use binreg::domain::{Param, Registry, parse_pairs};
use binreg::error::RegistryError;
use binreg::manager::RemoteManager;

const PASSWORD_ENV: &str = "BINREG_PASSWORD";

#[derive(Parser)]
#[command(name = "binreg")]
#[command(about = "Parameterized binary package registry over local, WebDAV and Nexus remotes")]
#[command(version)]
struct Cli {
    #[arg(long, global = true, help = "Config document (defaults to BINREG_CONFIG)")]
    config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Manage configured remotes")]
    Remote(RemoteArgs),
    #[command(about = "Manage registries on a remote")]
    Registry(RegistryArgs),
    #[command(about = "Upload a directory as a binary")]
    Upload(UploadArgs),
    #[command(about = "Download a binary")]
    Download(DownloadArgs),
    #[command(about = "Move a binary to another assignment")]
    Reassign(ReassignArgs),
    #[command(about = "Delete a binary from a remote")]
    Remove(RemoveArgs),
}

#[derive(Args)]
struct RemoteArgs {
    #[command(subcommand)]
    command: RemoteCommand,
}

#[derive(Subcommand)]
enum RemoteCommand {
    #[command(about = "Add a remote")]
    Add(AddRemoteArgs),
    #[command(about = "Remove a remote")]
    Remove { name: String },
    #[command(about = "List remotes")]
    List,
    #[command(about = "Replace the default try-list")]
    Default { names: Vec<String> },
}

#[derive(Args)]
struct AddRemoteArgs {
    name: String,

    #[arg(long = "type", help = "local, webdav, nexus2 or nexus3")]
    remote_type: String,

    #[arg(long)]
    path: Option<String>,

    #[arg(long)]
    url: Option<String>,

    #[arg(long)]
    root: Option<String>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    repository: Option<String>,

    #[arg(long)]
    username: Option<String>,
}

#[derive(Args)]
struct RegistryArgs {
    #[command(subcommand)]
    command: RegistryCommand,
}

#[derive(Subcommand)]
enum RegistryCommand {
    #[command(about = "Create a registry with a parameter schema (name or name=default)")]
    Create {
        #[arg(long)]
        remote: String,
        name: String,
        params: Vec<String>,
    },
    #[command(about = "List registries on a remote")]
    List {
        #[arg(long)]
        remote: String,
    },
    #[command(about = "Show a registry's schema and binaries")]
    Show {
        #[arg(long)]
        remote: String,
        name: String,
    },
}

#[derive(Args)]
struct UploadArgs {
    #[arg(long)]
    remote: String,

    registry: String,

    dir: Utf8PathBuf,

    #[arg(help = "Parameter values as key=value")]
    values: Vec<String>,
}

#[derive(Args)]
struct DownloadArgs {
    registry: String,

    dest: Utf8PathBuf,

    #[arg(help = "Parameter values as key=value")]
    values: Vec<String>,

    #[arg(long, help = "Use this remote instead of the default try-list")]
    remote: Option<String>,

    #[arg(long, help = "Ignore the local cache")]
    fresh: bool,
}

#[derive(Args)]
struct ReassignArgs {
    #[arg(long)]
    remote: String,

    registry: String,

    #[arg(long, num_args = 0..)]
    from: Vec<String>,

    #[arg(long, num_args = 0..)]
    to: Vec<String>,
}

#[derive(Args)]
struct RemoveArgs {
    #[arg(long)]
    remote: String,

    registry: String,

    values: Vec<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<RegistryError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &RegistryError) -> u8 {
    match error {
        RegistryError::NotFoundAnywhere { .. } | RegistryError::NotFound(_) => 2,
        RegistryError::Connection { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => ConfigLoader::default_path()?,
    };
    let cache = Cache::open_default()?;
    let mut manager = RemoteManager::load(config_path, cache)?;

    match cli.command {
        Commands::Remote(args) => run_remote(args.command, &mut manager),
        Commands::Registry(args) => run_registry(args.command, &manager),
        Commands::Upload(args) => run_upload(args, &manager),
        Commands::Download(args) => run_download(args, &manager),
        Commands::Reassign(args) => run_reassign(args, &manager),
        Commands::Remove(args) => run_remove(args, &manager),
    }
}

fn run_remote(command: RemoteCommand, manager: &mut RemoteManager) -> miette::Result<()> {
    match command {
        RemoteCommand::Add(args) => {
            let spec = RemoteSpec {
                remote_type: args.remote_type.parse::<BackendKind>()?.as_str().to_string(),
                path: args.path,
                url: args.url,
                root: args.root,
                host: args.host,
                repository: args.repository,
                username: args.username,
                password: std::env::var(PASSWORD_ENV)
                    .ok()
                    .filter(|value| !value.is_empty()),
            };
            let remote = manager.add_remote(&args.name, spec)?;
            if remote.is_offline() {
                println!("added {} (unreachable, cache-only for now)", remote.name());
            } else {
                println!("added {} -> {}", remote.name(), remote.location());
            }
        }
        RemoteCommand::Remove { name } => {
            manager.remove_remote(&name)?;
            println!("removed {name}");
        }
        RemoteCommand::List => {
            let default = manager.default_list();
            for remote in manager.list_remotes() {
                let rank = default
                    .iter()
                    .position(|name| name == remote.name())
                    .map(|index| format!(" [default #{}]", index + 1))
                    .unwrap_or_default();
                println!(
                    "{}\t{}\t{}{rank}",
                    remote.name(),
                    remote.kind(),
                    remote.location()
                );
            }
            for (name, reason) in manager.unusable_remotes() {
                println!("{name}\t-\tunusable: {reason}");
            }
        }
        RemoteCommand::Default { names } => {
            manager.set_default(names)?;
            println!("default: {}", manager.default_list().join(", "));
        }
    }
    Ok(())
}

fn run_registry(command: RegistryCommand, manager: &RemoteManager) -> miette::Result<()> {
    match command {
        RegistryCommand::Create {
            remote,
            name,
            params,
        } => {
            let params = params
                .iter()
                .map(|value| value.parse::<Param>())
                .collect::<Result<Vec<_>, _>>()?;
            let registry = Registry::new(name, params)?;
            manager.remote(&remote)?.create_registry(&registry)?;
            println!("created {}", registry.name());
        }
        RegistryCommand::List { remote } => {
            for name in manager.remote(&remote)?.list_registries()? {
                println!("{name}");
            }
        }
        RegistryCommand::Show { remote, name } => {
            let remote = manager.remote(&remote)?;
            let registry = remote.registry(&name)?;
            let schema = registry
                .params()
                .iter()
                .map(Param::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            println!("{} [{schema}]", registry.name());
            for assignment in remote.list_binaries(&registry)? {
                println!("  {}", registry.path_for(&assignment));
            }
        }
    }
    Ok(())
}

fn run_upload(args: UploadArgs, manager: &RemoteManager) -> miette::Result<()> {
    let remote = manager.remote(&args.remote)?;
    let registry = remote.registry(&args.registry)?;
    let partial = parse_pairs(&args.values)?;
    let assignment = remote.upload(&registry, &partial, &args.dir)?;
    println!(
        "uploaded {} to {}:{}",
        args.dir,
        remote.name(),
        registry.path_for(&assignment)
    );
    Ok(())
}

fn run_download(args: DownloadArgs, manager: &RemoteManager) -> miette::Result<()> {
    let partial = parse_pairs(&args.values)?;
    let source = match &args.remote {
        Some(name) => {
            let remote = manager.remote(name)?;
            let registry = remote.registry(&args.registry)?;
            remote.download(&registry, &partial, args.fresh, &args.dest)?;
            remote.name().to_string()
        }
        None => {
            let registry = manager.find_registry(&args.registry)?;
            manager.default_download(&registry, &partial, &args.dest, args.fresh)?
        }
    };
    println!("downloaded {} from {source} into {}", args.registry, args.dest);
    Ok(())
}

fn run_reassign(args: ReassignArgs, manager: &RemoteManager) -> miette::Result<()> {
    let remote = manager.remote(&args.remote)?;
    let registry = remote.registry(&args.registry)?;
    let from = parse_pairs(&args.from)?;
    let to = parse_pairs(&args.to)?;
    let assignment = remote.reassign(&registry, &from, &to)?;
    println!("moved to {}", registry.path_for(&assignment));
    Ok(())
}

fn run_remove(args: RemoveArgs, manager: &RemoteManager) -> miette::Result<()> {
    let remote = manager.remote(&args.remote)?;
    let registry = remote.registry(&args.registry)?;
    let partial = parse_pairs(&args.values)?;
    remote.remove(&registry, &partial)?;
    println!("removed {} ({})", registry.name(), registry.resolve(&partial)?);
    Ok(())
}
