use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use thiserror::Error;
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

use patchc::diag::{has_errors, Diagnostic};
use patchc::dot::emit_dot;
use patchc::pass::PassId;
use patchc::patch::Patch;
use patchc::pipeline::{compute_provenance, run_pipeline, CompilationState, CompileOptions};
use patchc::registry::{Registries, RegistryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    /// Linked IR as JSON.
    Ir,
    /// Dependency graph in Graphviz DOT.
    Graph,
    /// Diagnostics as JSON.
    Diagnostics,
    /// Provenance hashes as JSON.
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "patchc",
    version,
    about = "Patch graph compiler: lowers node-graph patches to a linked IR"
)]
struct Cli {
    /// Input patch (JSON)
    patch: PathBuf,

    /// Block/transform manifest (repeatable)
    #[arg(short = 'r', long = "registry")]
    registry: Vec<PathBuf>,

    /// Output artifact
    #[arg(long, value_enum, default_value_t = EmitStage::Ir)]
    emit: EmitStage,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Treat buses without publishers as errors
    #[arg(long)]
    require_bus_publishers: bool,

    /// Start from an empty registry instead of the built-in library
    #[arg(long)]
    no_builtins: bool,

    /// Log pass timing and lowering decisions
    #[arg(long)]
    verbose: bool,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{}: invalid patch: {source}", path.display())]
    Patch {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("cannot serialize output: {0}")]
    Serialize(#[from] serde_json::Error),
}

fn init_logging(verbose: bool) {
    let default = if verbose { "patchc=debug" } else { "patchc=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("patchc: error: {}", e);
            ExitCode::from(2)
        }
    }
}

/// Returns whether compilation succeeded.
fn run(cli: &Cli) -> Result<bool, CliError> {
    // ── Registries ──
    let mut registries = if cli.no_builtins {
        Registries::empty()
    } else {
        Registries::builtin()
    };
    for path in &cli.registry {
        let n = registries.load_manifest(path)?;
        debug!(entries = n, path = %path.display(), "loaded manifest");
    }
    info!(
        blocks = registries.blocks.len(),
        transforms = registries.transforms.len(),
        "registries ready"
    );

    // ── Patch ──
    let text = std::fs::read_to_string(&cli.patch).map_err(|source| CliError::Io {
        path: cli.patch.clone(),
        source,
    })?;
    let patch = Patch::from_json(&text).map_err(|source| CliError::Patch {
        path: cli.patch.clone(),
        source,
    })?;

    if cli.emit == EmitStage::BuildInfo {
        let provenance = compute_provenance(&patch, &registries);
        write_output(cli.output.as_deref(), &provenance.to_json())?;
        return Ok(true);
    }

    // ── Compile ──
    let options = CompileOptions {
        require_bus_publishers: cli.require_bus_publishers,
    };
    let terminal = match cli.emit {
        EmitStage::Graph => PassId::CycleCheck,
        EmitStage::Ir | EmitStage::Diagnostics | EmitStage::BuildInfo => PassId::Link,
    };
    let mut state = CompilationState::new(&patch, &registries, options);
    let echo = cli.emit != EmitStage::Diagnostics;
    let result = run_pipeline(&mut state, terminal, |_, diags: &[Diagnostic]| {
        if echo {
            for d in diags {
                eprintln!("{}", d);
            }
        }
    });
    if let Err(e) = &result {
        debug!(error = %e, "pipeline stopped");
    }

    let body = match cli.emit {
        EmitStage::Ir => match &state.artifacts.linked {
            Some(linked) if result.is_ok() => Some(linked.to_json()?),
            _ => None,
        },
        EmitStage::Graph => match (
            &state.artifacts.graph,
            &state.artifacts.validated,
            &state.artifacts.normalized,
        ) {
            (Some(graph), Some(validated), Some(normalized)) => {
                Some(emit_dot(graph, validated, normalized))
            }
            _ => None,
        },
        EmitStage::Diagnostics => Some(serde_json::to_string_pretty(&state.diagnostics)?),
        EmitStage::BuildInfo => None,
    };
    if let Some(body) = body {
        write_output(cli.output.as_deref(), &body)?;
    }
    Ok(!has_errors(&state.diagnostics))
}

fn write_output(path: Option<&Path>, body: &str) -> Result<(), CliError> {
    match path {
        Some(path) => std::fs::write(path, body).map_err(|source| CliError::Io {
            path: path.to_path_buf(),
            source,
        }),
        None => {
            print!("{}", body);
            if !body.ends_with('\n') {
                println!();
            }
            Ok(())
        }
    }
}
