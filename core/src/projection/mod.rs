pub mod amplitude;
pub mod contour;
pub mod shiptrack;
pub mod tabular;
pub mod timeseries;
pub mod window;

pub use amplitude::{AmplitudeProjection, AmplitudeSnapshot};
pub use contour::{ContourKind, ContourProjection, ContourSnapshot};
pub use shiptrack::{QuiverSegment, ShipTrackProjection, ShipTrackSnapshot};
pub use tabular::{EnsembleSummary, TabularProjection, TabularSnapshot};
pub use timeseries::{Metric, Series, TimeSeriesOptions, TimeSeriesProjection, TimeSeriesSnapshot};
pub use window::RollingWindow;
