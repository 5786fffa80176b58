//! Utility helpers shared by the authentication core.
//!
//! - [`env`] - validated environment variable access used when loading
//!   [`RefreshSettings`](crate::auth::RefreshSettings) from the process
//!   environment.

pub mod env;

pub use env::{EnvUtils, EnvVarError};
