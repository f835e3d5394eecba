pub mod db;
pub mod http;
#[cfg(test)]
pub mod memory;
pub mod mqtt;
