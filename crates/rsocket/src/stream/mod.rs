//! Per-stream state: id allocation, credit accounting and the stream state machines.

mod flow;
mod id;
pub(crate) mod machine;
mod registry;

pub use id::StreamIdAllocator;
pub use machine::{Interaction, Role};
pub(crate) use machine::{Progress, StreamMachine};
pub(crate) use registry::StreamRegistry;
