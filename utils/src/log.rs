// This makes it easy to import the logging stuff
//
// Call sites do `use utils::log;` and then `log::error!(...)`.

#![allow(unused_imports)]
pub use tracing::{debug, error, info, trace, warn};
pub use crate::logging::init;
