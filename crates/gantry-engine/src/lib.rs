//! Pipeline graph model, validation, transforms, and the execution engine.
//!
//! The flow from text to a finished run:
//! 1. `gantry_dot::parse` the DOT source, [`Graph::from_dot`] to flatten it.
//! 2. [`transforms::apply_all`] for variable expansion and the stylesheet
//!    cascade.
//! 3. [`validation::lint`] / [`validation::validate`] before executing.
//! 4. [`Executor::run`] walks the graph through the handler registry,
//!    checkpointing after every node.

pub mod checkpoint;
pub mod condition;
pub mod edge_selection;
pub mod engine;
pub mod events;
pub mod graph;
pub mod handler;
pub mod handlers;
pub mod interviewer;
pub mod runlog;
pub mod state;
pub mod stylesheet;
pub mod transforms;
pub mod validation;

pub use checkpoint::{clear_checkpoint, load_checkpoint, save_checkpoint, RunCheckpoint};
pub use engine::Executor;
pub use events::{EventEmitter, PipelineEvent};
pub use graph::{Edge, Graph, Node};
pub use handler::{HandlerRegistry, HandlerRequest, NodeHandler};
pub use handlers::{
    default_registry, default_registry_with_interviewer, Generator, ProviderCliGenerator,
    SimulatedGenerator, ToolHandler,
};
pub use interviewer::{
    AutoApproveInterviewer, ConsoleInterviewer, Interviewer, Question, RecordingInterviewer,
};
pub use runlog::{unique_logs_dir, RunLog};
pub use state::{EngineState, RunResult, RunStatus};
pub use stylesheet::Stylesheet;
pub use validation::{classify, lint, validate, Diagnostic, Severity, Synopsis};
