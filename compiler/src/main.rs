use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use qcc::ast::Module;
use qcc::cfg::Cfg;
use qcc::error::QccError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    /// Annotated control-flow graph in Graphviz DOT
    Dot,
    /// Structurally unreachable and dataflow-dead statements
    Unreachable,
    /// The module after dead code elimination, as JSON
    Prune,
    /// Graph size and fingerprint
    Stats,
}

#[derive(Parser, Debug)]
#[command(
    name = "qcc",
    version,
    about = "qcc — control-flow and dataflow inspection for JSON-encoded modules"
)]
struct Cli {
    /// Input module (JSON)
    module: PathBuf,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Dot)]
    emit: EmitStage,

    /// Analyze this function instead of the module body
    #[arg(short, long)]
    function: Option<String>,

    /// Output file path (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print analysis progress
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(()) => {}
        Err(e @ (QccError::Io { .. } | QccError::Write(_))) => {
            eprintln!("qcc: error: {e}");
            std::process::exit(2);
        }
        Err(e) => {
            eprintln!("qcc: error: {e}");
            std::process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> Result<(), QccError> {
    let source = std::fs::read_to_string(&cli.module).map_err(|source| QccError::Io {
        path: cli.module.clone(),
        source,
    })?;
    let mut module: Module = serde_json::from_str(&source)?;

    if cli.verbose {
        eprintln!("qcc: module = {}", module.name);
        eprintln!("qcc: emit   = {:?}", cli.emit);
    }

    let text = match cli.emit {
        EmitStage::Prune => {
            match &cli.function {
                Some(name) => {
                    qcc::dce::eliminate_dead_code(&mut module, name)?;
                }
                None => {
                    qcc::dce::prune_module_body(&mut module);
                }
            }
            serde_json::to_string_pretty(&module)?
        }
        stage => {
            let mut cfg = build(&module, cli.function.as_deref())?;
            cfg.populate_reachable_expressions();
            render(&cfg, stage)
        }
    };

    match &cli.output {
        Some(path) => std::fs::write(path, text + "\n").map_err(|source| QccError::Io {
            path: path.clone(),
            source,
        })?,
        None => {
            let mut out = std::io::stdout().lock();
            writeln!(out, "{text}")?;
        }
    }
    Ok(())
}

fn build<'a>(module: &'a Module, function: Option<&str>) -> Result<Cfg<'a>, QccError> {
    match function {
        None => Ok(Cfg::for_module(module)),
        Some(name) => {
            let f = module
                .function(name)
                .ok_or_else(|| QccError::UnknownFunction {
                    module: module.name.clone(),
                    function: name.to_string(),
                })?;
            Ok(Cfg::for_function(module, f))
        }
    }
}

fn render(cfg: &Cfg, stage: EmitStage) -> String {
    match stage {
        EmitStage::Dot => qcc::dot::emit_dot(cfg),
        EmitStage::Unreachable => {
            let mut lines = Vec::new();
            for id in cfg.unreachable_nodes() {
                lines.push(format!("unreachable\t{}", cfg.node(id).data));
            }
            for id in cfg.unreachable_statements() {
                lines.push(format!("unused\t{}", cfg.node(id).data));
            }
            lines.join("\n")
        }
        EmitStage::Stats => format!(
            "nodes: {}\nedges: {}\nfingerprint: {}",
            cfg.nodes().len(),
            cfg.edges().len(),
            cfg.fingerprint()
        ),
        EmitStage::Prune => unreachable!("prune is handled before graph construction"),
    }
}
