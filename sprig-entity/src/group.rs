use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use sprig_types::{constants, utils::timestamp, MetricKind};
use tokio::sync::mpsc::UnboundedSender;

use crate::metric::{MetricRecord, MetricValue};

/// Which of an entity's three metric groups a metric belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    Attributes,
    Data,
    Commands,
}

impl GroupKind {
    /// The name prefix used for this group's metrics inside a BIRTH payload.
    pub(crate) fn birth_prefix(&self) -> &'static str {
        match self {
            GroupKind::Attributes => constants::ATTR_PREFIX,
            GroupKind::Data => constants::DATA_PREFIX,
            GroupKind::Commands => constants::CMD_PREFIX,
        }
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKind::Attributes => f.write_str("attributes"),
            GroupKind::Data => f.write_str("data"),
            GroupKind::Commands => f.write_str("commands"),
        }
    }
}

/// Notification of a metric mutation, delivered to the receiver handed out by
/// [Entity::events](crate::Entity::events).
#[derive(Debug, Clone)]
pub struct MetricEvent {
    pub group: GroupKind,
    pub name: String,
    pub value: MetricKind,
    pub timestamp: u64,
}

/// An ordered, name keyed collection of [MetricValue]s.
///
/// Insertion order is preserved so births and snapshots list metrics in the
/// order they were first set. Setting an existing name updates it in place.
#[derive(Debug)]
pub struct MetricGroup {
    kind: GroupKind,
    metrics: Vec<MetricValue>,
    events: Option<UnboundedSender<MetricEvent>>,
}

impl MetricGroup {
    pub(crate) fn new(kind: GroupKind) -> Self {
        Self {
            kind,
            metrics: Vec::new(),
            events: None,
        }
    }

    pub fn kind(&self) -> GroupKind {
        self.kind
    }

    pub(crate) fn set_event_sender(&mut self, sender: UnboundedSender<MetricEvent>) {
        self.events = Some(sender)
    }

    fn notify(&self, name: &str, value: &MetricKind, time: u64) {
        if let Some(events) = &self.events {
            let _ = events.send(MetricEvent {
                group: self.kind,
                name: name.into(),
                value: value.clone(),
                timestamp: time,
            });
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.metrics.iter().position(|x| x.name() == name)
    }

    /// Set `name` to `value`, inserting the metric if it does not exist yet.
    ///
    /// A `None` value is a no-op and returns false, so callers can forward
    /// optional readings without checking them first. A missing timestamp
    /// defaults to now. Returns true when the group changed.
    pub fn set<S: Into<String>>(
        &mut self,
        name: S,
        value: Option<MetricKind>,
        time: Option<u64>,
    ) -> bool {
        self.set_inner(name, value, time, false)
    }

    /// Same as [set](Self::set) but without emitting a change notification.
    /// Used when replaying metrics received from the network.
    pub(crate) fn set_quiet<S: Into<String>>(
        &mut self,
        name: S,
        value: Option<MetricKind>,
        time: Option<u64>,
    ) -> bool {
        self.set_inner(name, value, time, true)
    }

    fn set_inner<S: Into<String>>(
        &mut self,
        name: S,
        value: Option<MetricKind>,
        time: Option<u64>,
        quiet: bool,
    ) -> bool {
        let value = match value {
            Some(value) => value,
            None => return false,
        };
        let name = name.into();
        let time = time.unwrap_or_else(timestamp);
        if !quiet {
            self.notify(&name, &value, time);
        }
        match self.position(&name) {
            Some(pos) => self.metrics[pos].set(value, time),
            None => self.metrics.push(MetricValue::new(name, value, Some(time))),
        }
        true
    }

    /// Set `name` to a series of samples with parallel timestamps. An empty
    /// value list is a no-op and returns false.
    pub fn set_series<S: Into<String>>(
        &mut self,
        name: S,
        values: Vec<MetricKind>,
        timestamps: Vec<u64>,
    ) -> bool {
        self.set_series_inner(name, values, timestamps, false)
    }

    pub(crate) fn set_series_quiet<S: Into<String>>(
        &mut self,
        name: S,
        values: Vec<MetricKind>,
        timestamps: Vec<u64>,
    ) -> bool {
        self.set_series_inner(name, values, timestamps, true)
    }

    fn set_series_inner<S: Into<String>>(
        &mut self,
        name: S,
        values: Vec<MetricKind>,
        timestamps: Vec<u64>,
        quiet: bool,
    ) -> bool {
        if values.is_empty() {
            return false;
        }
        let name = name.into();
        if !quiet {
            let time = timestamps.first().copied().unwrap_or_else(timestamp);
            self.notify(&name, &values[0], time);
        }
        match self.position(&name) {
            Some(pos) => self.metrics[pos].set_series(values, timestamps),
            None => self
                .metrics
                .push(MetricValue::new_series(name, values, timestamps)),
        }
        true
    }

    /// Apply a batch of values sharing one timestamp.
    pub fn set_from_map(&mut self, values: HashMap<String, MetricKind>, time: Option<u64>) {
        let time = Some(time.unwrap_or_else(timestamp));
        for (name, value) in values {
            self.set(name, Some(value), time);
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(pos) => {
                self.metrics.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.metrics.clear()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// True when any metric in the group has an unread update.
    pub fn is_updated(&self) -> bool {
        self.metrics.iter().any(|x| x.is_updated())
    }

    pub fn names(&self) -> Vec<&str> {
        self.metrics.iter().map(|x| x.name()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&MetricValue> {
        self.position(name).map(|pos| &self.metrics[pos])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut MetricValue> {
        self.position(name).map(|pos| &mut self.metrics[pos])
    }

    /// Read the current value of `name`, clearing its updated flag.
    pub fn read(&mut self, name: &str) -> Option<MetricKind> {
        self.get_mut(name).map(|x| x.read())
    }

    /// The current value of `name` without clearing its updated flag.
    pub fn peek(&self, name: &str) -> Option<&MetricKind> {
        self.get(name).map(|x| x.peek())
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricValue> {
        self.metrics.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut MetricValue> {
        self.metrics.iter_mut()
    }

    /// Snapshot every metric in insertion order.
    pub fn to_records(&self) -> Vec<MetricRecord> {
        self.metrics.iter().map(|x| x.record()).collect()
    }
}

impl fmt::Display for MetricGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let records = self.to_records();
        match serde_json::to_string(&records) {
            Ok(json) => f.write_str(&json),
            Err(_) => Err(fmt::Error),
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn set_inserts_then_updates_in_place() {
        let mut group = MetricGroup::new(GroupKind::Data);
        assert!(group.set("temp", Some(MetricKind::Int(1)), Some(1)));
        assert!(group.set("rpm", Some(MetricKind::Int(2)), Some(1)));
        assert!(group.set("temp", Some(MetricKind::Int(5)), Some(2)));
        assert_eq!(group.names(), vec!["temp", "rpm"]);
        assert_eq!(group.peek("temp"), Some(&MetricKind::Int(5)));
    }

    #[test]
    fn none_value_is_a_no_op() {
        let mut group = MetricGroup::new(GroupKind::Data);
        assert!(!group.set("temp", None, None));
        assert!(group.is_empty());
    }

    #[test]
    fn empty_series_is_a_no_op() {
        let mut group = MetricGroup::new(GroupKind::Data);
        assert!(!group.set_series("temp", vec![], vec![]));
        assert!(group.is_empty());
    }

    #[test]
    fn group_updated_until_every_metric_read() {
        let mut group = MetricGroup::new(GroupKind::Data);
        group.set("a", Some(MetricKind::Int(1)), Some(1));
        group.set("b", Some(MetricKind::Int(2)), Some(1));
        assert!(group.is_updated());
        group.read("a");
        assert!(group.is_updated());
        group.read("b");
        assert!(!group.is_updated());
    }

    #[test]
    fn set_emits_event_but_quiet_set_does_not() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut group = MetricGroup::new(GroupKind::Commands);
        group.set_event_sender(tx);

        group.set("reboot", Some(MetricKind::Bool(true)), Some(7));
        let event = rx.try_recv().expect("event should be queued");
        assert_eq!(event.group, GroupKind::Commands);
        assert_eq!(event.name, "reboot");
        assert_eq!(event.value, MetricKind::Bool(true));
        assert_eq!(event.timestamp, 7);

        group.set_quiet("reboot", Some(MetricKind::Bool(false)), Some(8));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn remove_and_clear() {
        let mut group = MetricGroup::new(GroupKind::Attributes);
        group.set("version", Some(MetricKind::Text("1.0".into())), None);
        assert!(group.remove("version"));
        assert!(!group.remove("version"));
        group.set("version", Some(MetricKind::Text("1.1".into())), None);
        group.clear();
        assert!(group.is_empty());
    }

    #[test]
    fn map_batch_shares_one_timestamp() {
        let mut group = MetricGroup::new(GroupKind::Data);
        group.set_from_map(
            HashMap::from([
                ("temp".to_string(), MetricKind::Double(20.0)),
                ("rpm".to_string(), MetricKind::Int(1500)),
            ]),
            Some(42),
        );
        assert_eq!(group.len(), 2);
        assert_eq!(group.get("temp").map(|m| m.timestamp()), Some(42));
        assert_eq!(group.get("rpm").map(|m| m.timestamp()), Some(42));
    }
}
