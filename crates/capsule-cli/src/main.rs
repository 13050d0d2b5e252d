mod commands;

use capsule_core::{install_signal_handler, CreateOptions, Orchestrator};
use capsule_store::MountConfig;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_DESCRIPTOR_ERROR, EXIT_FAILURE, EXIT_STORE_ERROR};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "capsule",
    version,
    about = "Capture and restore reproducible containerized application environments"
)]
struct Cli {
    /// Path to the Capsule root directory (registry, config, projects).
    #[arg(long, default_value = "~/.capsule")]
    root: String,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Register a new environment (no container is created yet).
    Create {
        /// Environment name: letters, digits, '-' and '_'.
        name: String,
        /// Container image (defaults to `default_base_image` from config).
        #[arg(long)]
        base_image: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
        /// Name of the main workflow file.
        #[arg(long)]
        workflow_file: Option<String>,
        /// Host directory mounted as the models directory.
        #[arg(long)]
        models: Option<String>,
        /// Host directory mounted as the output directory.
        #[arg(long)]
        output: Option<String>,
        /// Host directory mounted as the input directory.
        #[arg(long)]
        input: Option<String>,
        /// Host port published for the application.
        #[arg(long)]
        port: Option<u16>,
        /// Container runtime selector (e.g. `nvidia`).
        #[arg(long)]
        runtime: Option<String>,
        /// Launch arguments passed to the container entrypoint (after --).
        #[arg(last = true)]
        command: Vec<String>,
    },
    /// List all environments.
    #[command(alias = "ls")]
    List,
    /// Start an environment's container, creating it if needed.
    Activate {
        /// Environment ID or name.
        env: String,
    },
    /// Stop an environment's container.
    Deactivate {
        /// Environment ID or name.
        env: String,
    },
    /// Capture a running environment into a descriptor file.
    Pack {
        /// Environment ID or name.
        env: String,
        /// Main workflow file; required when several are present.
        #[arg(long)]
        workflow_file: Option<String>,
        /// Output path (defaults to the environment's project directory).
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Reconcile an environment toward a descriptor.
    Restore {
        /// Environment ID or name.
        env: String,
        /// Descriptor to restore from (defaults to the project descriptor).
        #[arg(long)]
        descriptor: Option<PathBuf>,
    },
    /// Remove an environment, its container, and its project directory.
    Delete {
        /// Environment ID or name.
        env: String,
    },
    /// Show every environment with its live container state.
    Status,
    /// Print the effective configuration.
    Config,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("CAPSULE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Completions { shell } => return finish(commands::completions::run::<Cli>(shell)),
        Commands::ManPages { ref dir } => return finish(commands::man_pages::run::<Cli>(dir)),
        _ => {}
    }

    install_signal_handler();

    let root = expand_tilde(&cli.root);
    let orch = match Orchestrator::new(&root) {
        Ok(o) => o,
        Err(e) => return finish(Err(e.to_string())),
    };
    let json = cli.json;

    let needs_engine = matches!(
        cli.command,
        Commands::Activate { .. }
            | Commands::Deactivate { .. }
            | Commands::Pack { .. }
            | Commands::Restore { .. }
            | Commands::Delete { .. }
            | Commands::Status
    );
    if needs_engine && std::env::var("CAPSULE_SKIP_PREREQS").as_deref() != Ok("1") {
        let missing = capsule_runtime::check_engine_prereqs(&orch.config().engine);
        if !missing.is_empty() {
            eprintln!("error: {}", capsule_runtime::format_missing(&missing));
            return ExitCode::from(EXIT_FAILURE);
        }
    }

    let result = match cli.command {
        Commands::Create {
            name,
            base_image,
            description,
            workflow_file,
            models,
            output,
            input,
            port,
            runtime,
            command,
        } => {
            let opts = CreateOptions {
                name,
                description,
                base_image,
                workflow_file,
                mounts: MountConfig {
                    models,
                    output,
                    input,
                },
                port,
                runtime,
                command: Some(command).filter(|c| !c.is_empty()),
            };
            commands::create::run(&orch, opts, json)
        }
        Commands::List => commands::list::run(&orch, json),
        Commands::Activate { env } => commands::activate::run(&orch, &env, json),
        Commands::Deactivate { env } => commands::deactivate::run(&orch, &env, json),
        Commands::Pack {
            env,
            workflow_file,
            out,
        } => commands::pack::run(&orch, &env, workflow_file.as_deref(), out.as_deref(), json),
        Commands::Restore { env, descriptor } => {
            commands::restore::run(&orch, &env, descriptor.as_deref(), json)
        }
        Commands::Delete { env } => commands::delete::run(&orch, &env, json),
        Commands::Status => commands::status::run(&orch, json),
        Commands::Config => commands::config::run(&orch, json),
        Commands::Completions { .. } | Commands::ManPages { .. } => Ok(commands::EXIT_SUCCESS),
    };
    finish(result)
}

fn finish(result: Result<u8, String>) -> ExitCode {
    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(exit_code_for(&msg))
        }
    }
}

fn exit_code_for(msg: &str) -> u8 {
    if msg.starts_with("descriptor error:") || msg.starts_with("no descriptor at") {
        EXIT_DESCRIPTOR_ERROR
    } else if msg.starts_with("store error:") {
        EXIT_STORE_ERROR
    } else {
        EXIT_FAILURE
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
