//! Resumption: position tracking, the replay buffer and resume tokens.

mod manager;
mod replay_buffer;
mod token;

pub(crate) use manager::{Admission, ResumeManager};
pub use replay_buffer::ReplayError;
pub use token::ResumeToken;
