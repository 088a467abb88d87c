//! Remote code injection for the recc controller.
//!
//! This crate builds one-shot x64 stubs that load the agent module inside
//! a target process, call an exported entry point with marshalled
//! arguments and then unmap themselves, and dispatches them on remote
//! threads.

pub mod asm;
mod error;
#[cfg(windows)]
mod remote;
mod stub;

pub use error::{InjectError, InjectResult};
#[cfg(windows)]
pub use remote::{call_agent, RemoteBuffer};
pub use stub::{emit_agent_call, RemoteArg, RemoteImports, MAX_ARGS, STUB_REGION_SIZE};
