mod system;

pub use system::{NetworkCommands, SystemNetwork};
