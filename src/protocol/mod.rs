//! Wire codecs for the two protocols under test.
//!
//! Both codecs are symmetric (encode and decode for requests and responses) so that the
//! in-process fake servers used by the integration tests speak exactly the bytes the
//! sessions do.

pub mod cql;
pub mod resp;

pub use resp::Command;
pub use resp::Reply;
