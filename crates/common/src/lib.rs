//! Common types shared by the NSP fault gateway crates

mod error;
mod periodic;
mod secret;

pub use error::{Error, Result};
pub use periodic::spawn_periodic;
pub use secret::Secret;
