//! Word statistics demo
//!
//! Reads a text file (or stdin), splits every line into words, checks and
//! measures each word in parallel, joins the words back per line and prints
//! one summary per line.

use anyhow::Context;
use dataflow_rs::{
    pipeline::{tracing_error_logger, ErrorSink},
    DataflowBuilder, DataflowConfig, SplitJoinResult,
};
use std::io::Read;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Line {
    number: usize,
    text: String,
}

impl ErrorSink for Line {}

struct LineSummary {
    number: usize,
    words: usize,
    letters: usize,
    rejected: Vec<String>,
}

impl From<SplitJoinResult<Line, usize>> for LineSummary {
    fn from(result: SplitJoinResult<Line, usize>) -> Self {
        let rejected = result
            .failed_items()
            .iter()
            .map(|failed| failed.error.to_string())
            .collect();
        Self {
            number: result.parent().number,
            words: result.total_items_count(),
            letters: result.successfully_completed_items().iter().sum(),
            rejected,
        }
    }
}

fn read_input() -> anyhow::Result<String> {
    match std::env::args().nth(1) {
        Some(path) => {
            std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path))
        }
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read stdin")?;
            Ok(text)
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,dataflow_rs=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let lines: Vec<Line> = read_input()?
        .lines()
        .enumerate()
        .map(|(index, text)| Line {
            number: index + 1,
            text: text.to_string(),
        })
        .collect();
    tracing::info!("Processing {} lines", lines.len());

    let settings = DataflowConfig::load_or_default()
        .settings()
        .with_default_error_logger(tracing_error_logger());

    // Summaries are printed on a plain thread, away from the runtime
    let (summary_tx, summary_rx) = crossbeam_channel::unbounded::<LineSummary>();
    let printer = std::thread::spawn(move || {
        let mut printed = 0usize;
        for summary in summary_rx {
            println!(
                "line {:>4}: {:>3} words, {:>5} letters",
                summary.number, summary.words, summary.letters
            );
            for reason in &summary.rejected {
                println!("           rejected: {}", reason);
            }
            printed += 1;
        }
        printed
    });

    let mut dataflow = DataflowBuilder::<Line>::receive(settings)
        .split(|line: &Line| {
            Ok(line
                .text
                .split_whitespace()
                .map(str::to_string)
                .collect::<Vec<_>>())
        })
        .process(|_line, word: &String| {
            anyhow::ensure!(
                !word.chars().any(|c| c.is_ascii_digit()),
                "{:?} contains digits",
                word
            );
            Ok(())
        })
        .transform(|_line, word: &String| Ok(word.chars().filter(|c| c.is_alphabetic()).count()))
        .final_join(move |result| {
            if summary_tx.send(LineSummary::from(result)).is_err() {
                tracing::warn!("Summary printer stopped early");
            }
        });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    runtime.block_on(dataflow.process(lines, None))?;
    let elapsed = dataflow.elapsed()?;
    drop(dataflow);
    drop(runtime);

    let printed = printer
        .join()
        .map_err(|_| anyhow::anyhow!("Summary printer panicked"))?;
    tracing::info!("Printed {} line summaries in {:?}", printed, elapsed);
    Ok(())
}
