//! A2A bridge: exposes every accepted Agent as an A2A JSON-RPC endpoint and
//! forwards tasks to the execution runtime.

pub mod executor;
pub mod registry;
pub mod server;
pub mod session;
pub mod task;
pub mod types;

pub use executor::{AgentExecutor, ExecutionEvent, HttpExecutor};
pub use registry::{ExecutorHandler, HandlerEntry, HandlerRegistry, TaskHandler};
pub use server::{A2aState, router};
pub use session::{MemorySessionStore, Session, SessionStore};
pub use task::TaskManager;
pub use types::{AgentCapabilities, AgentCard};
