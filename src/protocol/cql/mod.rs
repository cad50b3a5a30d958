//! CQL native protocol v4, the subset a literal-statement client needs.

mod frame;
mod message;
mod result;
mod types;


pub use frame::*;
pub use message::*;
pub use result::*;
pub use types::ColumnType;
pub use types::Consistency;
pub use types::CqlValue;
