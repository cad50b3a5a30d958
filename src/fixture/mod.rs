//! Table fixtures for tabular conformance tests
mod helper;
mod schema;
pub use helper::*;
pub use schema::*;
