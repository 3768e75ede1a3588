use std::io::{self, Write};

use crate::agent::{CommandPipeline, Outcome, SubmitOutcome};
use crate::core::ledger::LedgerEntry;
use crate::core::session::GenerationResult;

const PROGRESS_WIDTH: usize = 72;

/// Submits one request, redrawing the running text on stderr until it ends.
/// Ctrl-C cancels the generation instead of exiting.
pub async fn run_request(pipeline: &CommandPipeline, text: &str, quiet: bool) -> SubmitOutcome {
    let mut partial = pipeline.subscribe_partial();
    let submit = pipeline.submit(text);
    tokio::pin!(submit);

    if !quiet {
        eprint!("\x1b[90mThinking...\x1b[0m");
        io::stderr().flush().ok();
    }

    let mut watching = true;
    loop {
        tokio::select! {
            outcome = &mut submit => {
                if !quiet {
                    eprint!("\r\x1b[K");
                    io::stderr().flush().ok();
                }
                return outcome;
            }
            changed = partial.changed(), if watching => {
                if changed.is_err() {
                    watching = false;
                    continue;
                }
                let text = partial.borrow_and_update().clone();
                if !quiet {
                    draw_progress(&text);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprint!("\r\x1b[K\x1b[33mCancelling...\x1b[0m");
                io::stderr().flush().ok();
                pipeline.cancel();
            }
        }
    }
}

fn draw_progress(text: &str) {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let count = flat.chars().count();
    let tail: String = if count > PROGRESS_WIDTH {
        flat.chars().skip(count - PROGRESS_WIDTH).collect()
    } else {
        flat
    };
    eprint!("\r\x1b[K\x1b[90m{tail}\x1b[0m");
    io::stderr().flush().ok();
}

pub fn render_outcome(outcome: &SubmitOutcome) {
    match outcome {
        SubmitOutcome::Busy => {
            eprintln!("\x1b[33mInference in progress, please wait.\x1b[0m");
        }
        SubmitOutcome::Cancelled => {
            eprintln!("\x1b[33mInference cancelled.\x1b[0m");
        }
        SubmitOutcome::Failed(message) => {
            eprintln!("\x1b[31;1m[error]\x1b[0m {message}");
        }
        SubmitOutcome::Executed { command, result } => {
            tracing::debug!(command = command.name(), "rendering result");
            match result.outcome {
                Outcome::Done => println!("\x1b[32m\u{2713}\x1b[0m {}", result.detail),
                Outcome::Reply => println!("{}", result.detail),
                Outcome::Failed => {
                    eprintln!("\x1b[31;1m[error]\x1b[0m {}", result.message);
                }
            }
            if result.outcome == Outcome::Done && !result.failed.is_empty() {
                eprintln!("\x1b[33mNot inserted: {}\x1b[0m", result.failed.join(", "));
            }
        }
    }
}

pub fn render_entries(entries: &[LedgerEntry]) {
    if entries.is_empty() {
        println!("No expenses recorded.");
        return;
    }

    println!(
        "\x1b[1m{:<16}  {:<24}  {:<14}  {:>5}  {:>10}  {:>10}\x1b[0m",
        "Date", "Item", "Category", "Qty", "Unit", "Total"
    );
    let mut sum = 0.0;
    for e in entries {
        sum += e.total_price;
        println!(
            "\x1b[90m{:<16}\x1b[0m  {:<24}  {:<14}  {:>5}  {:>10.2}  {:>10.2}",
            e.created_at.format("%Y-%m-%d %H:%M"),
            truncate(&e.item_name, 24),
            truncate(&e.category, 14),
            e.quantity,
            e.price_per_unit,
            e.total_price
        );
    }
    println!(
        "\x1b[1m{} entries, total {:.2}\x1b[0m",
        entries.len(),
        sum
    );
}

pub fn render_stats(last: Option<&GenerationResult>, context_size: i64) {
    match last {
        None => println!("No generation yet."),
        Some(r) => {
            println!(
                "Speed: {:.2} tok/s | Time: {:.2}s | Context: {}/{}",
                r.tokens_per_second, r.elapsed_seconds, r.context_tokens_used, context_size
            );
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('\u{2026}');
    out
}
