//! Shared Win32 plumbing for the recc controller and agent.
//!
//! This crate provides the scoped handle wrapper, the structured Win32
//! error type and the UTF-16 helpers used on both sides of the injection
//! boundary.

mod error;
#[cfg(windows)]
mod handle;
mod wide;

pub use error::{Win32Error, Win32Result};
#[cfg(windows)]
pub use handle::OwnedHandle;
pub use wide::{from_wide_ptr, to_wide, to_wide_nul};
