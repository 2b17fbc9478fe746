//! Agent runtime gateway for skillbridge.
//!
//! The crate turns a user message into a reasoning trace:
//! 1. **Gateway** (`runtime`, `claude`) - start a query against the agent
//!    runtime and expose its output as an ordered [`runtime::EventStream`]
//! 2. **Decoding** (`stream_json`) - map the CLI's stream-json lines onto the
//!    closed [`events::AgentEvent`] set
//! 3. **Normalization** (`trace`) - number events into [`trace::TraceStep`]s
//!    and assemble the reply
//! 4. **Session** (`session`) - drive one query under a deadline and decide
//!    when a failure is fatal
//!
//! # Failure semantics
//!
//! A failure after at least one step becomes an error step and the partial
//! trace is returned. A failure before any step surfaces as
//! [`session::SessionError::Unavailable`].

pub mod claude;
pub mod events;
pub mod fixtures;
pub mod runtime;
pub mod session;
pub mod stream_json;
pub mod trace;

pub use claude::ClaudeCliRuntime;
pub use events::AgentEvent;
pub use runtime::{AgentRuntime, EventStream, GatewayError, QueryConfig};
pub use session::{QuerySession, SessionError, SessionSettings};
pub use trace::{StepKind, StepTraceNormalizer, Trace, TraceStep};
