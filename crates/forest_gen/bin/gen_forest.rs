//! `gen-forest <symbolCount> [--max-steps N] [--no-labels] [--progress]`
//!
//! Writes the reduction forest of every expression with the given symbol
//! count as JSONL on stdout. Exit codes: 0 success, 1 usage error,
//! 2 fatal runtime error.

use forest_gen::{generate_forest, ForestError, ForestOptions};
use std::io::Write;
use std::process::ExitCode;

const USAGE: &str = "usage: gen-forest <symbolCount> [--max-steps N] [--no-labels] [--progress]";

fn parse_args(args: &[String]) -> Result<ForestOptions, ForestError> {
    let mut symbol_count: Option<usize> = None;
    let mut options_tail = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--max-steps" => {
                let value = iter
                    .next()
                    .ok_or_else(|| ForestError::Usage("--max-steps needs a value".into()))?;
                let steps: u32 = value
                    .parse()
                    .map_err(|_| ForestError::Usage(format!("bad --max-steps value: {value}")))?;
                options_tail.push(("max-steps", steps));
            }
            "--no-labels" => options_tail.push(("no-labels", 0)),
            "--progress" => options_tail.push(("progress", 0)),
            other if symbol_count.is_none() => {
                symbol_count = Some(other.parse().map_err(|_| {
                    ForestError::Usage(format!("bad symbol count: {other}"))
                })?);
            }
            other => {
                return Err(ForestError::Usage(format!("unexpected argument: {other}")));
            }
        }
    }

    let symbol_count =
        symbol_count.ok_or_else(|| ForestError::Usage("missing symbol count".into()))?;
    let mut options = ForestOptions::new(symbol_count);
    for (key, value) in options_tail {
        options = match key {
            "max-steps" => options.with_max_steps(value),
            "no-labels" => options.with_labels(false),
            "progress" => options.with_progress(true),
            _ => options,
        };
    }
    Ok(options)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = match parse_args(&args) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("{err}");
            eprintln!("{USAGE}");
            return ExitCode::from(err.exit_code() as u8);
        }
    };

    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::new(stdout.lock());
    match generate_forest(&options, &mut out).await {
        Ok(stats) => {
            let _ = out.flush();
            eprintln!(
                "{} expressions, {} normal forms, {} diverged",
                stats.expressions, stats.normal_forms, stats.diverged
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("gen-forest: {err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}
