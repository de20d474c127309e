pub mod planner;
pub mod prompt;
pub mod summarize;

pub use planner::{plan, PlannedEntry, PlannerError};
pub use prompt::{assemble_system_prompt, PromptInputs};
pub use summarize::{
    ClaimedRange, NewSummary, SummarizationStore, SummarizationWorker,
    DEFAULT_SUMMARIZATION_BATCH, DEFAULT_SUMMARIZATION_THRESHOLD,
};
