pub mod error;
pub mod feature;
pub mod schema;
pub mod sink;
pub mod source;

pub use error::*;
pub use feature::*;
pub use schema::*;
pub use sink::*;
pub use source::*;
