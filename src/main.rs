mod compiler;
mod discover;
mod dispatch;
mod errors;
mod model;
mod registry;
mod scanner;
mod source;
mod weave;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::compiler::Compiler;
use crate::discover::{discover_sources, DependencyIndex};
use crate::model::Project;
use crate::registry::JoinpointRegistry;

/// CLI arguments for weftc execution.
#[derive(Parser, Debug)]
#[command(
    name = "weftc",
    about = "Deterministic aspect weaving for class descriptor projects.",
    version
)]
struct Cli {
    /// Project descriptor holding the working set of classes and mixins.
    #[arg(long, value_name = "PATH")]
    project: PathBuf,
    /// Joinpoint registry cache produced at plugin-registration time.
    #[arg(long, value_name = "PATH")]
    joinpoints: Option<PathBuf>,
    /// Dependency index used to discover additional sources to weave.
    #[arg(long, value_name = "PATH")]
    deps: Option<PathBuf>,
    /// Directory for woven sources; stdout when omitted.
    #[arg(long, value_name = "PATH")]
    out: Option<PathBuf>,
    /// Re-persist the registry cache after the pass.
    #[arg(long, value_name = "PATH")]
    save_joinpoints: Option<PathBuf>,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run(cli)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("weftc=info".parse().expect("valid directive")),
        )
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    if !cli.project.exists() {
        anyhow::bail!("project not found: {}", cli.project.display());
    }

    let started_at = Instant::now();
    let text = fs::read_to_string(&cli.project)
        .with_context(|| format!("failed to read {}", cli.project.display()))?;
    let mut project: Project = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse {}", cli.project.display()))?;

    let mut registry = JoinpointRegistry::new();
    if let Some(path) = &cli.joinpoints {
        registry.load_joinpoints(path)?;
    }
    if !registry.has_joinpoints() && !cli.quiet {
        info!("joinpoint registry is empty, nothing to weave");
    }

    if let Some(path) = &cli.deps {
        let index = read_index(path)?;
        let working: BTreeSet<String> = project.classes.keys().cloned().collect();
        let added = discover_sources(&working, &index, &registry);
        for (class, file) in &added {
            info!(%class, %file, "additional source requires weaving");
        }
    }

    let mut compiler = Compiler::new(&registry);
    let results = compiler.compile_all(&mut project);
    let woven = results.values().filter(|flag| **flag).count();

    write_outputs(&project, &results, cli.out.as_deref())?;

    if let Some(path) = &cli.save_joinpoints {
        registry.save_joinpoints(path)?;
    }

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} classes={} woven={}",
            started_at.elapsed().as_millis(),
            results.len(),
            woven
        );
    }

    Ok(())
}

fn read_index(path: &Path) -> Result<DependencyIndex> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

/// Write each woven class's source to the output directory, or to stdout
/// with a separating header when no directory was given.
fn write_outputs(
    project: &Project,
    results: &BTreeMap<String, bool>,
    out: Option<&Path>,
) -> Result<()> {
    match out {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            for (name, woven) in results {
                if !woven {
                    continue;
                }
                let Some(class) = project.class(name) else {
                    continue;
                };
                let path = dir.join(format!("{name}.wv"));
                fs::write(&path, class.get_source())
                    .with_context(|| format!("failed to write {}", path.display()))?;
            }
        }
        None => {
            let stdout = io::stdout();
            let mut writer = stdout.lock();
            for (name, woven) in results {
                if !woven {
                    continue;
                }
                let Some(class) = project.class(name) else {
                    continue;
                };
                writeln!(writer, "// ---- {name} ----")?;
                writer.write_all(class.get_source().as_bytes())?;
            }
        }
    }
    Ok(())
}
