//! Built-in node handlers and registry factories.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use gantry_types::{Outcome, Result};

use crate::handler::{
    HandlerRegistry, HandlerRequest, NodeHandler, TYPE_CONDITIONAL, TYPE_EXIT, TYPE_FAN_IN,
    TYPE_FAN_OUT, TYPE_GENERATION, TYPE_LOOP, TYPE_START, TYPE_TOOL, TYPE_WAIT_HUMAN,
};
use crate::interviewer::{AutoApproveInterviewer, Interviewer};

mod generate;
mod tool;
mod wait_human;

pub use generate::{
    extract_label, GenerationHandler, GenerationRequest, Generator, LoopControllerHandler,
    ProviderCliGenerator, SimulatedGenerator,
};
pub use tool::ToolHandler;
pub use wait_human::WaitHumanHandler;

/// Start, exit, bare conditional, and fan-in nodes do no work themselves;
/// routing happens in edge selection (fan-out is intercepted by the engine).
pub struct PassThroughHandler;

#[async_trait]
impl NodeHandler for PassThroughHandler {
    async fn execute(&self, _request: &HandlerRequest<'_>) -> Result<Outcome> {
        Ok(Outcome::success(""))
    }
}

/// Registry with every built-in handler, answering human gates automatically.
pub fn default_registry(
    generator: Arc<dyn Generator>,
    run_root: &Path,
    logs_root: &Path,
) -> HandlerRegistry {
    default_registry_with_interviewer(generator, Arc::new(AutoApproveInterviewer), run_root, logs_root)
}

/// Registry with every built-in handler and a caller-chosen interviewer.
pub fn default_registry_with_interviewer(
    generator: Arc<dyn Generator>,
    interviewer: Arc<dyn Interviewer>,
    run_root: &Path,
    logs_root: &Path,
) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    let pass = Arc::new(PassThroughHandler);
    registry.register(TYPE_START, pass.clone());
    registry.register(TYPE_EXIT, pass.clone());
    registry.register(TYPE_CONDITIONAL, pass.clone());
    registry.register(TYPE_FAN_OUT, pass.clone());
    registry.register(TYPE_FAN_IN, pass);
    registry.register(TYPE_GENERATION, Arc::new(GenerationHandler::new(generator.clone())));
    registry.register(TYPE_LOOP, Arc::new(LoopControllerHandler::new(generator)));
    registry.register(TYPE_TOOL, Arc::new(ToolHandler::new(run_root, logs_root)));
    registry.register(TYPE_WAIT_HUMAN, Arc::new(WaitHumanHandler::new(interviewer)));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_covers_every_builtin_type() {
        let dir = std::env::temp_dir();
        let registry = default_registry(Arc::new(SimulatedGenerator), &dir, &dir);
        for ty in [
            TYPE_START,
            TYPE_EXIT,
            TYPE_CONDITIONAL,
            TYPE_FAN_OUT,
            TYPE_FAN_IN,
            TYPE_GENERATION,
            TYPE_LOOP,
            TYPE_TOOL,
            TYPE_WAIT_HUMAN,
        ] {
            assert!(registry.get(ty).is_some(), "missing handler for {ty}");
        }
    }
}
