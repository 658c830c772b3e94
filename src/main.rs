// src/main.rs

use anyhow::{Context as _, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use pantry::{
    BuildPolicy, CancelToken, Controller, DepGraph, EngineConfig, GraphBuilder, Profile,
    RecipeRegistry, compute_package_ids,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "pantry")]
#[command(author, version, about = "Build and package C/C++ recipes into relocatable binaries", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Arguments shared by every command that resolves a graph
#[derive(Args)]
struct GraphArgs {
    /// Recipe reference: name/version or name/[range]
    reference: String,

    /// Recipe index folder; may be given several times
    #[arg(short, long = "index", required = true)]
    index: Vec<PathBuf>,

    /// Host profile
    #[arg(long = "profile-host", visible_alias = "pr-h")]
    profile_host: Option<PathBuf>,

    /// Build profile; defaults to the host profile
    #[arg(long = "profile-build", visible_alias = "pr-b")]
    profile_build: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve, build and package a recipe and its dependencies
    Create {
        #[command(flatten)]
        graph: GraphArgs,

        /// Keep building independent packages after a failure
        #[arg(long)]
        keep_going: bool,

        /// Build policy: missing, always or never
        #[arg(long = "build")]
        policy: Option<String>,

        /// Nodes driven in parallel
        #[arg(short, long)]
        jobs: Option<usize>,
    },
    /// Print the resolved graph with package ids, without building
    Graph {
        #[command(flatten)]
        graph: GraphArgs,
    },
    /// Acquire the sources of a recipe into the cache
    Source {
        #[command(flatten)]
        graph: GraphArgs,
    },
}

fn load_profile(path: Option<&Path>) -> Result<Profile> {
    match path {
        Some(path) => Profile::load(path).with_context(|| format!("loading profile {}", path.display())),
        None => Ok(Profile::default()),
    }
}

fn resolve(args: &GraphArgs) -> Result<(DepGraph, Profile, Profile)> {
    let host = load_profile(args.profile_host.as_deref())?;
    let build = match &args.profile_build {
        Some(_) => load_profile(args.profile_build.as_deref())?,
        None => host.clone(),
    };
    let registry = RecipeRegistry::new(args.index.clone());
    let mut graph = GraphBuilder::new(&registry, &host, &build)?.build_one(&args.reference)?;
    compute_package_ids(&mut graph)?;
    Ok((graph, host, build))
}

#[cfg(unix)]
mod interrupt {
    //! Ctrl-C sets the cancel token instead of killing the process

    use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
    use pantry::CancelToken;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    static INTERRUPTED: AtomicBool = AtomicBool::new(false);

    extern "C" fn on_interrupt(_: nix::libc::c_int) {
        INTERRUPTED.store(true, Ordering::SeqCst);
    }

    pub fn install(token: CancelToken) {
        let action = SigAction::new(SigHandler::Handler(on_interrupt), SaFlags::empty(), SigSet::empty());
        // SAFETY: the handler only stores to an atomic
        if unsafe { sigaction(Signal::SIGINT, &action) }.is_err() {
            return;
        }
        thread::spawn(move || {
            loop {
                if INTERRUPTED.load(Ordering::SeqCst) {
                    tracing::warn!("Interrupted, finishing running stages");
                    token.cancel();
                    return;
                }
                thread::sleep(Duration::from_millis(100));
            }
        });
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = EngineConfig::load()?;
    let cancel = CancelToken::new();
    #[cfg(unix)]
    interrupt::install(cancel.clone());

    match cli.command {
        Commands::Create {
            graph: args,
            keep_going,
            policy,
            jobs,
        } => {
            if keep_going {
                config.keep_going = true;
            }
            if let Some(policy) = policy {
                config.policy = policy
                    .parse::<BuildPolicy>()
                    .map_err(|_| anyhow!("unknown build policy '{}'", policy))?;
            }
            if let Some(jobs) = jobs {
                config.max_concurrency = jobs.max(1);
            }
            let (graph, host, build) = resolve(&args)?;
            let controller = Controller::new(config, cancel)?;
            let report = controller.run(&graph, &host, &build)?;

            for node in &report.nodes {
                let id = node.package_id.as_deref().unwrap_or("-");
                println!("{:<8} {} ({}) {}", node.outcome, node.reference, node.context, id);
            }
            for error in &report.errors {
                eprintln!("error: {}", error);
            }
            if report.is_success() {
                info!("All {} package(s) available", report.nodes.len());
                return Ok(ExitCode::SUCCESS);
            }
            let code = report.first_error_kind().map(|k| k.exit_code()).unwrap_or(2);
            Ok(ExitCode::from(code.clamp(0, 255) as u8))
        }
        Commands::Graph { graph: args } => {
            let (graph, _, _) = resolve(&args)?;
            let controller = Controller::new(config, cancel)?;
            let missing = pantry::lifecycle::missing_packages(controller.cache(), &graph)?;
            for level in graph.levels() {
                for id in level {
                    let node = graph.node(*id);
                    let status = if node.is_invalid() {
                        "invalid"
                    } else if missing.contains(id) {
                        "missing"
                    } else {
                        "cached"
                    };
                    println!(
                        "{} {} {}",
                        node.label(),
                        node.package_id.as_deref().unwrap_or("-"),
                        status
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Source { graph: args } => {
            let (graph, _, _) = resolve(&args)?;
            let root = *graph
                .roots()
                .first()
                .ok_or_else(|| anyhow!("no root node for {}", args.reference))?;
            let controller = Controller::new(config, cancel)?;
            let folder = controller.source(&graph, root)?;
            println!("{}", folder.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let code = e
                .downcast_ref::<pantry::Error>()
                .map(|err| err.kind().exit_code())
                .unwrap_or(1);
            if code == 130 {
                warn!("Cancelled");
            }
            ExitCode::from(code.clamp(0, 255) as u8)
        }
    }
}
