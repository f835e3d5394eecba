pub mod time;
pub mod timeseries;
