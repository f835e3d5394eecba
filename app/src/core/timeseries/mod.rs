pub mod datapoint;

pub use datapoint::DataPoint;
