pub mod geo;
pub mod stats;

pub use geo::{destination, GeoPoint};
pub use stats::VelocityMath;
