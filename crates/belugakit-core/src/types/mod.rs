//! Common type aliases
//!
//! See [`aliases`] for details.

mod aliases;

pub use aliases::*;
