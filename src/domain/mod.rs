pub mod ordered;
pub mod query;
pub mod records;

pub use ordered::*;
pub use query::*;
pub use records::*;
