//! weft: a declarative workflow engine.
//!
//! A workflow is a YAML document naming a set of typed *resources* (shell
//! command, HTTP call, SQL query, LLM completion, Python script) plus a
//! target action id. The engine resolves the dependency graph, expands item
//! iterations, evaluates `{{…}}` expressions against a live environment,
//! dispatches each resource through a kind-keyed executor registry, and
//! returns the captured outputs keyed by action id.

pub mod constants;
pub mod duration;
pub mod engine;
pub mod error;
pub mod executors;
pub mod expr;
pub mod logging;
pub mod sandbox;
pub mod store;
pub mod workflow;

pub use engine::context::{ExecutionContext, RequestContext};
pub use engine::registry::ExecutorRegistry;
pub use engine::{Engine, RunOutcome};
pub use error::Error;
pub use store::MemoryStore;
pub use workflow::validator::ValidationMode;
pub use workflow::{load_workflow, Workflow};
