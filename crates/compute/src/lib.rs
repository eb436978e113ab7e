//! Geometry subdivision: antimeridian normalization, bounded-size splitting
//! of polygons and lines, and the vector job drivers built on them.

pub mod antimeridian;
pub mod error;
pub mod flatten;
pub mod line;
pub mod nodes;
pub mod polygon;
pub mod vector;

pub use error::*;
pub use line::*;
pub use nodes::*;
pub use polygon::*;
pub use vector::*;
