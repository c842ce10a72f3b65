//! Shared error type and small cross-cutting helpers used by every
//! `helix-*` crate in the control plane.

mod error;
mod resources;
mod time;

pub use error::{Context, Error, FromMessage, Result};
pub use resources::WorkerResources;
pub use time::{Clock, SystemClock};
