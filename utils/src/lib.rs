// A set of helpers shared by the wsi crates
//
// Logging setup and the error plumbing used by device setup code.
pub mod logging;
pub mod log;

extern crate anyhow;
pub use anyhow::{anyhow, Context, Error, Result};
