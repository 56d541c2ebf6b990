//! Command handlers behind the CLI.
//!
//! Each handler takes the shared [`AppState`](crate::state::AppState) and
//! returns a serializable result; rendering is left to the caller.

pub mod export;
pub mod history;
pub mod import;
pub mod status;
pub mod upload;

pub use export::*;
pub use history::*;
pub use import::*;
pub use status::*;
pub use upload::*;
