//! Skool core library
//!
//! Session credential lifecycle, schedule fetching, and the column layout
//! used to render overlapping lessons side by side.

pub mod client;
pub mod config;
pub mod error;
pub mod ics;
pub mod layout;
pub mod retry;
pub mod schedule;
pub mod session;
pub mod token_store;
pub mod types;

// Re-export core types and error handling
pub use error::{Error, LoginError, Result};
pub use types::*;

/// Commonly used items
pub mod prelude {
    pub use crate::{
        client::*, config::Config, ics::*, layout::layout, retry::*, schedule::*, session::*,
        token_store::*, types::*,
    };
}
