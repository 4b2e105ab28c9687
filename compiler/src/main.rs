use clap::Parser;
use std::path::PathBuf;

use loopinit::diag::render;
use loopinit::id::LoopId;
use loopinit::pass::PassId;
use loopinit::pipeline::{compile, PipelineOptions};
use loopinit::report::build_report;

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    Params,
    Json,
    Ir,
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "loopinit",
    version,
    about = "Resolves loop work amounts, pointer increments and finalization offsets of lowered kernels"
)]
struct Cli {
    /// Input kernel description file
    source: PathBuf,

    /// Output file path (stdout if omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Params)]
    emit: EmitStage,

    /// Concrete work amount for a loop, as LOOP=N (repeatable)
    #[arg(long = "work-amount", value_parser = parse_work_amount)]
    work_amounts: Vec<(LoopId, u64)>,

    /// Print compiler phases and timing
    #[arg(long)]
    verbose: bool,
}

fn parse_work_amount(arg: &str) -> Result<(LoopId, u64), String> {
    let (id, n) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected LOOP=N, got `{arg}`"))?;
    let id: u32 = id
        .trim()
        .parse()
        .map_err(|e| format!("bad loop id `{id}`: {e}"))?;
    let n: u64 = n
        .trim()
        .parse()
        .map_err(|e| format!("bad work amount `{n}`: {e}"))?;
    Ok((LoopId(id), n))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if cli.verbose {
        eprintln!("loopinit: source = {}", cli.source.display());
        eprintln!("loopinit: emit   = {:?}", cli.emit);
    }

    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("loopinit: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };

    let terminal = match cli.emit {
        EmitStage::Ir => PassId::Lower,
        EmitStage::Params | EmitStage::Json | EmitStage::BuildInfo => PassId::Verify,
    };
    let options = PipelineOptions {
        work_amounts: cli.work_amounts.clone(),
        verbose: cli.verbose,
    };
    let state = compile(&source, terminal, &options);

    for diag in &state.diagnostics {
        eprintln!("{}: {}", cli.source.display(), render(diag, &source));
    }
    if state.has_error {
        std::process::exit(1);
    }

    let text = match cli.emit {
        EmitStage::BuildInfo => match &state.provenance {
            Some(prov) => prov.to_json(),
            None => String::new(),
        },
        EmitStage::Ir => state.ir.as_ref().map(|ir| ir.to_string()).unwrap_or_default(),
        EmitStage::Params => state
            .ir
            .as_ref()
            .map(|ir| build_report(ir).to_string())
            .unwrap_or_default(),
        EmitStage::Json => {
            let Some(ir) = state.ir.as_ref() else {
                std::process::exit(1);
            };
            match build_report(ir).to_json() {
                Ok(json) => json + "\n",
                Err(e) => {
                    eprintln!("loopinit: error: {}", e);
                    std::process::exit(1);
                }
            }
        }
    };

    match &cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, text) {
                eprintln!("loopinit: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
            if cli.verbose {
                eprintln!("loopinit: wrote {}", path.display());
            }
        }
        None => print!("{text}"),
    }
}
