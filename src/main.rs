use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{ensure, Context, Result};
use clap::error::ErrorKind;
use clap::Parser;

use snoopsim::sim::config::CacheGeometry;
use snoopsim::sim::report;
use snoopsim::sim::top::SnoopsimTop;
use snoopsim::sim::trace;

#[derive(Parser)]
#[command(about = "Trace-driven quad-core MESI snooping-bus cache simulator")]
struct SnoopsimArgs {
    /// Prefix of the four per-core trace files (<prefix>_proc0.trace ..
    /// <prefix>_proc3.trace)
    #[arg(short = 't')]
    trace_prefix: String,

    /// Number of set index bits (sets = 2^s)
    #[arg(short = 's', default_value_t = 2)]
    set_bits: u32,

    /// Associativity (cache lines per set)
    #[arg(short = 'E', default_value_t = 2)]
    associativity: usize,

    /// Number of block bits (block size = 2^b bytes)
    #[arg(short = 'b', default_value_t = 4)]
    block_bits: u32,

    /// Write the text report to a file instead of stdout
    #[arg(short = 'o')]
    output: Option<PathBuf>,

    /// Also dump the run summary as JSON
    #[arg(long)]
    stats_json: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = match SnoopsimArgs::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &SnoopsimArgs) -> Result<()> {
    ensure!(args.associativity > 0, "associativity (-E) must be at least 1");
    ensure!(
        args.set_bits as u64 + (args.block_bits as u64) < u64::BITS as u64,
        "set bits plus block bits must fit an address"
    );
    let geometry = CacheGeometry::new(args.set_bits, args.associativity, args.block_bits);

    let traces = trace::load_traces(&args.trace_prefix)?;
    let mut top = SnoopsimTop::new(geometry, traces);
    top.run();

    let summary = report::run_summary(&top);
    match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("could not open output file {}", path.display()))?;
            report::write_report(BufWriter::new(file), &summary)
                .context("failed to write report")?;
        }
        None => {
            report::write_report(io::stdout().lock(), &summary)
                .context("failed to write report")?;
        }
    }

    if let Some(path) = &args.stats_json {
        let file = File::create(path)
            .with_context(|| format!("could not open stats file {}", path.display()))?;
        report::write_json(BufWriter::new(file), &summary)?;
    }
    Ok(())
}
