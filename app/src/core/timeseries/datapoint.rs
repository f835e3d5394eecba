use crate::core::time::DateTime;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DataPoint<V> {
    pub value: V,
    pub timestamp: DateTime,
}

impl<V> DataPoint<V> {
    pub fn new(value: V, timestamp: DateTime) -> Self {
        Self { value, timestamp }
    }
}
