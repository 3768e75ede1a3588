use anyhow::Result;
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

use crate::core::ledger::EntryFilter;

pub async fn run(app: super::App, model: Option<PathBuf>) -> Result<()> {
    println!("\x1b[1mnl-ledger\x1b[0m v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "Engine: \x1b[36m{}\x1b[0m",
        app.pipeline.session().engine_name()
    );
    match model {
        Some(path) => load_model(&app, &path).await,
        None => println!("No model loaded. Use \x1b[33m/model <path>\x1b[0m to load one."),
    }
    println!("Type \x1b[33m/help\x1b[0m for commands, \x1b[33mCtrl-D\x1b[0m to exit.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("\x1b[32;1mledger>\x1b[0m ");
        io::stderr().flush().ok();

        let input = match next_input(&mut lines, tokio::signal::ctrl_c()).await {
            Ok(Input::Line(line)) => line,
            Ok(Input::Interrupted) => {
                eprintln!("\n\x1b[90mNothing to cancel. Use /exit or Ctrl-D to quit.\x1b[0m");
                continue;
            }
            Ok(Input::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(e) => {
                eprintln!("Input error: {e}");
                break;
            }
        };

        let input = input.trim().to_string();
        if input.is_empty() {
            continue;
        }

        if input.starts_with('/') {
            match handle_command(&input, &app).await {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    eprintln!("\x1b[31mCommand error: {e}\x1b[0m");
                    continue;
                }
            }
        }

        let outcome = super::output::run_request(&app.pipeline, &input, false).await;
        super::output::render_outcome(&outcome);
    }

    app.pipeline.close();
    Ok(())
}

enum Input {
    Line(String),
    /// Ctrl-C at the prompt.
    Interrupted,
    Eof,
}

/// Waits for the next line or an interrupt, whichever comes first. A line
/// read in progress survives an interrupt.
async fn next_input<R, F>(lines: &mut Lines<R>, interrupt: F) -> io::Result<Input>
where
    R: AsyncBufRead + Unpin,
    F: Future<Output = io::Result<()>>,
{
    tokio::select! {
        biased;
        _ = interrupt => Ok(Input::Interrupted),
        line = lines.next_line() => Ok(match line? {
            Some(line) => Input::Line(line),
            None => Input::Eof,
        }),
    }
}

async fn load_model(app: &super::App, path: &Path) {
    eprint!("\x1b[90mLoading {}...\x1b[0m", path.display());
    io::stderr().flush().ok();
    match app.pipeline.load_model(path).await {
        Ok(()) => eprintln!("\r\x1b[K\x1b[32m\u{2713}\x1b[0m Model loaded: \x1b[36m{}\x1b[0m", path.display()),
        Err(e) => eprintln!("\r\x1b[K\x1b[31mFailed to load model: {e}\x1b[0m"),
    }
}

async fn handle_command(input: &str, app: &super::App) -> Result<bool> {
    let (cmd, args) = match input.split_once(char::is_whitespace) {
        Some((cmd, args)) => (cmd, args.trim()),
        None => (input, ""),
    };

    match cmd {
        "/help" | "/h" => {
            println!("\x1b[1mCommands:\x1b[0m");
            println!("  /list                 Show all expenses");
            println!("  /list category <c>    Expenses in a category");
            println!("  /list above <n>       Expenses with a total of at least n");
            println!("  /list search <q>      Expenses whose name contains q");
            println!("  /model [path]         Show or load the model");
            println!("  /stats                Last generation metrics");
            println!("  /help                 Show this help");
            println!("  /exit                 Exit");
            println!("Anything else is sent to the model, e.g. \x1b[36madd 4kg mango of 20\x1b[0m.");
            println!("Ctrl-C stops a running request. At the prompt, use /exit or Ctrl-D to quit.");
            Ok(true)
        }
        "/exit" | "/quit" | "/q" => {
            println!("Goodbye!");
            Ok(false)
        }
        "/list" | "/l" => {
            let filter = parse_filter(args)?;
            let entries = app.store.list(&filter).await?;
            super::output::render_entries(&entries);
            Ok(true)
        }
        "/model" | "/m" => {
            if args.is_empty() {
                match app.pipeline.session().config() {
                    Some(c) => println!(
                        "Model: \x1b[36m{}\x1b[0m ({})",
                        c.model_path.display(),
                        app.pipeline.session_state()
                    ),
                    None => println!("No model loaded ({}).", app.pipeline.session_state()),
                }
            } else {
                load_model(app, Path::new(args)).await;
            }
            Ok(true)
        }
        "/stats" => {
            super::output::render_stats(
                app.pipeline.last_generation().as_ref(),
                app.config.sampling.context_size,
            );
            Ok(true)
        }
        _ => {
            eprintln!("Unknown command: {input}. Type /help for available commands.");
            Ok(true)
        }
    }
}

/// Parses the arguments of `/list`.
fn parse_filter(args: &str) -> Result<EntryFilter> {
    if args.is_empty() {
        return Ok(EntryFilter::All);
    }
    let (kind, value) = args
        .split_once(char::is_whitespace)
        .map(|(k, v)| (k, v.trim()))
        .unwrap_or((args, ""));
    if value.is_empty() {
        anyhow::bail!("/list {kind} needs a value");
    }

    match kind {
        "category" | "c" => Ok(EntryFilter::Category(value.to_string())),
        "above" | "a" => {
            let min: f64 = value
                .parse()
                .map_err(|_| anyhow::anyhow!("not a number: {value}"))?;
            Ok(EntryFilter::AbovePrice(min))
        }
        "search" | "s" => Ok(EntryFilter::NameContains(value.to_string())),
        other => anyhow::bail!("unknown filter: {other}"),
    }
}
