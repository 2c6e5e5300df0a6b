use serde::Serialize;
use sprig_types::{payload::DataType, utils::timestamp, MetricKind};

/// A named metric held by a [MetricGroup](crate::MetricGroup).
///
/// A metric usually holds a single value and the timestamp it was produced
/// at. Both are kept as parallel lists so a burst of samples can be staged
/// and published as one series. The externally visible value is always the
/// first element.
#[derive(Debug, Clone)]
pub struct MetricValue {
    name: String,
    values: Vec<MetricKind>,
    timestamps: Vec<u64>,
    alias: Option<u64>,
    updated: bool,
}

impl MetricValue {
    /// Create a single valued metric. A missing `timestamp` defaults to now.
    pub fn new<S: Into<String>>(name: S, value: MetricKind, time: Option<u64>) -> Self {
        Self {
            name: name.into(),
            values: vec![value],
            timestamps: vec![time.unwrap_or_else(timestamp)],
            alias: None,
            updated: true,
        }
    }

    /// Create a series valued metric from parallel value and timestamp lists.
    ///
    /// `values` must be non empty. The lists are taken as provided, a length
    /// mismatch is tolerated and simply makes the metric list valued.
    pub(crate) fn new_series<S: Into<String>>(
        name: S,
        values: Vec<MetricKind>,
        timestamps: Vec<u64>,
    ) -> Self {
        Self {
            name: name.into(),
            values,
            timestamps,
            alias: None,
            updated: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn alias(&self) -> Option<u64> {
        self.alias
    }

    pub fn set_alias(&mut self, alias: u64) {
        self.alias = Some(alias)
    }

    /// The wire datatype of the current value.
    pub fn datatype(&self) -> DataType {
        self.values[0].datatype()
    }

    pub fn is_updated(&self) -> bool {
        self.updated
    }

    /// True when the metric holds more than one sample, or when the value and
    /// timestamp lists have drifted apart in length.
    pub fn is_list_valued(&self) -> bool {
        self.values.len() > 1 || self.values.len() != self.timestamps.len()
    }

    /// Return the current value and clear the updated flag.
    pub fn read(&mut self) -> MetricKind {
        self.updated = false;
        self.values[0].clone()
    }

    /// Return the current value without clearing the updated flag.
    pub fn peek(&self) -> &MetricKind {
        &self.values[0]
    }

    /// The timestamp of the current value, in utc milliseconds.
    pub fn timestamp(&self) -> u64 {
        self.timestamps.first().copied().unwrap_or_else(timestamp)
    }

    /// The full value and timestamp series.
    pub fn series(&self) -> (&[MetricKind], &[u64]) {
        (&self.values, &self.timestamps)
    }

    pub(crate) fn set(&mut self, value: MetricKind, time: u64) {
        self.values = vec![value];
        self.timestamps = vec![time];
        self.updated = true;
    }

    pub(crate) fn set_series(&mut self, values: Vec<MetricKind>, timestamps: Vec<u64>) {
        self.values = values;
        self.timestamps = timestamps;
        self.updated = true;
    }

    pub(crate) fn clear_updated(&mut self) {
        self.updated = false;
    }

    /// Snapshot of the metric for serialisation, without touching the updated
    /// flag.
    pub fn record(&self) -> MetricRecord {
        let value = if self.is_list_valued() {
            RecordValue::Series(self.values.clone())
        } else {
            RecordValue::Single(self.values[0].clone())
        };
        MetricRecord {
            name: self.name.clone(),
            value,
            timestamp: self.timestamp(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RecordValue {
    Single(MetricKind),
    Series(Vec<MetricKind>),
}

/// A point in time snapshot of one metric.
#[derive(Debug, Clone, Serialize)]
pub struct MetricRecord {
    pub name: String,
    pub value: RecordValue,
    pub timestamp: u64,
}
