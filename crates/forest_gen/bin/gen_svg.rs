//! `gen-svg <symbolCount> [outDir] [--concurrency=N] [--max-steps N] [--no-labels]`
//!
//! Runs the forest and writes one DOT digraph per sink into `outDir`
//! (default `forest-dot/`), ready for graphviz to rasterize:
//!
//! ```text
//! for f in forest-dot/*.dot; do dot -Tsvg "$f" -o "${f%.dot}.svg"; done
//! ```
//!
//! The default step budget here (2 000) is much smaller than
//! `gen-forest`'s (100 000); pass `--max-steps` explicitly when the two
//! outputs must describe the same forest. Exit codes: 0 success, 1 usage
//! error, 2 fatal runtime error.

use forest_gen::dot::{group_by_sink, write_dot};
use forest_gen::{collect_records, ForestError, ForestOptions};
use skiarena_eval::EvalConfig;
use std::path::PathBuf;
use std::process::ExitCode;

const USAGE: &str =
    "usage: gen-svg <symbolCount> [outDir] [--concurrency=N] [--max-steps N] [--no-labels]";

struct SvgArgs {
    options: ForestOptions,
    out_dir: PathBuf,
}

fn parse_args(args: &[String]) -> Result<SvgArgs, ForestError> {
    let mut symbol_count: Option<usize> = None;
    let mut out_dir: Option<PathBuf> = None;
    let mut max_steps = EvalConfig::svg().max_steps;
    let mut concurrency = EvalConfig::default().n_workers;
    let mut labels = true;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix("--concurrency=") {
            concurrency = value
                .parse()
                .map_err(|_| ForestError::Usage(format!("bad --concurrency value: {value}")))?;
        } else if arg == "--max-steps" {
            let value = iter
                .next()
                .ok_or_else(|| ForestError::Usage("--max-steps needs a value".into()))?;
            max_steps = value
                .parse()
                .map_err(|_| ForestError::Usage(format!("bad --max-steps value: {value}")))?;
        } else if arg == "--no-labels" {
            labels = false;
        } else if symbol_count.is_none() {
            symbol_count = Some(
                arg.parse()
                    .map_err(|_| ForestError::Usage(format!("bad symbol count: {arg}")))?,
            );
        } else if out_dir.is_none() {
            out_dir = Some(PathBuf::from(arg));
        } else {
            return Err(ForestError::Usage(format!("unexpected argument: {arg}")));
        }
    }

    let symbol_count =
        symbol_count.ok_or_else(|| ForestError::Usage("missing symbol count".into()))?;
    Ok(SvgArgs {
        options: ForestOptions::new(symbol_count)
            .with_max_steps(max_steps)
            .with_concurrency(concurrency)
            .with_labels(labels),
        out_dir: out_dir.unwrap_or_else(|| PathBuf::from("forest-dot")),
    })
}

async fn run(args: SvgArgs) -> Result<(), ForestError> {
    let (paths, labels) = collect_records(&args.options).await?;
    std::fs::create_dir_all(&args.out_dir)?;

    let groups = group_by_sink(&paths);
    for (sink, group) in &groups {
        let file_path = args.out_dir.join(format!("sink-{sink}.dot"));
        let mut file = std::io::BufWriter::new(std::fs::File::create(&file_path)?);
        write_dot(&mut file, *sink, group, &labels)?;
    }
    eprintln!(
        "{} paths across {} sinks written to {}",
        paths.len(),
        groups.len(),
        args.out_dir.display()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let parsed = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("{err}");
            eprintln!("{USAGE}");
            return ExitCode::from(err.exit_code() as u8);
        }
    };

    match run(parsed).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("gen-svg: {err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}
