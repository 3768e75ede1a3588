use anyhow::Result;
use std::path::PathBuf;

use crate::agent::SubmitOutcome;

pub async fn run(
    app: super::App,
    model: Option<PathBuf>,
    prompt: String,
    output_format: super::OutputFormat,
    quiet: bool,
) -> Result<()> {
    let Some(model) = model else {
        anyhow::bail!("No model configured. Pass --model, set NL_LEDGER_MODEL, or run --import first.");
    };
    app.pipeline.load_model(&model).await?;

    let outcome = super::output::run_request(&app.pipeline, &prompt, quiet).await;

    match output_format {
        super::OutputFormat::Text => super::output::render_outcome(&outcome),
        super::OutputFormat::Json => {
            let output = match &outcome {
                SubmitOutcome::Executed { command, result } => serde_json::json!({
                    "command": command,
                    "result": result,
                    "generation": app.pipeline.last_generation(),
                }),
                SubmitOutcome::Cancelled => serde_json::json!({ "cancelled": true }),
                SubmitOutcome::Busy => serde_json::json!({ "error": "busy" }),
                SubmitOutcome::Failed(error) => serde_json::json!({ "error": error }),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    app.pipeline.close();

    match outcome {
        SubmitOutcome::Executed { result, .. } if result.is_failure() => {
            anyhow::bail!("{}", result.message)
        }
        SubmitOutcome::Failed(error) => anyhow::bail!(error),
        _ => Ok(()),
    }
}
