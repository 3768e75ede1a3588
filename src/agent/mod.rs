pub mod aggregator;
pub mod event;
pub mod executor;
pub mod interpreter;
pub mod pipeline;
pub mod prompt;
pub mod session;


pub use aggregator::StreamAggregator;
pub use event::SessionEvent;
pub use executor::{ExecutionResult, IntentExecutor, Outcome};
pub use interpreter::interpret;
pub use pipeline::{CommandPipeline, PipelineStatus, SubmitOutcome};
pub use session::InferenceSession;
