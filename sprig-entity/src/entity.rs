use std::fmt;

use log::{debug, warn};
use serde::Serialize;
use sprig_types::{
    constants,
    payload::{metric, DataType, Metric, Payload},
    utils::timestamp,
    DataSet, DataSetValue, MetricKind,
};
use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::{
    error::{EmptyEntity, PublishError},
    group::{GroupKind, MetricEvent, MetricGroup},
    metric::{MetricRecord, MetricValue},
};

/* Wire form of a series valued metric: a two column dataset */
const SERIES_TIMESTAMP_COLUMN: &str = "timestamp";
const SERIES_VALUE_COLUMN: &str = "value";

/// Identity of a Sparkplug entity within the namespace.
///
/// A device id is only present for devices, its absence makes the entity an
/// edge node. Everything role specific in this crate derives from that.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityId {
    group_id: String,
    node_id: String,
    device_id: Option<String>,
}

impl EntityId {
    pub fn node<S1: Into<String>, S2: Into<String>>(group_id: S1, node_id: S2) -> Self {
        Self {
            group_id: group_id.into(),
            node_id: node_id.into(),
            device_id: None,
        }
    }

    pub fn device<S1, S2, S3>(group_id: S1, node_id: S2, device_id: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self {
            group_id: group_id.into(),
            node_id: node_id.into(),
            device_id: Some(device_id.into()),
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn is_device(&self) -> bool {
        self.device_id.is_some()
    }

    /// The name the entity goes by, the device id for devices and the node
    /// id for edge nodes.
    pub fn entity_name(&self) -> &str {
        match &self.device_id {
            Some(device_id) => device_id,
            None => &self.node_id,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.device_id {
            Some(device_id) => write!(f, "{}/{}/{}", self.group_id, self.node_id, device_id),
            None => write!(f, "{}/{}", self.group_id, self.node_id),
        }
    }
}

/// A command that survived inbound filtering and was applied to the
/// `commands` group.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandUpdate {
    pub name: String,
    pub value: MetricKind,
    pub timestamp: u64,
}

/// The in-memory model of a Sparkplug entity.
///
/// An entity is three ordered metric groups, `attributes`, `data` and
/// `commands`, plus the identity they belong to. The same type models both
/// sides of the wire: a session serialises its entity into BIRTH and DATA
/// payloads, a host application deserialises received payloads into its
/// mirror of the remote entity.
#[derive(Debug)]
pub struct Entity {
    id: EntityId,
    pub attributes: MetricGroup,
    pub data: MetricGroup,
    pub commands: MetricGroup,
    birthed: bool,
}

impl Entity {
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            attributes: MetricGroup::new(GroupKind::Attributes),
            data: MetricGroup::new(GroupKind::Data),
            commands: MetricGroup::new(GroupKind::Commands),
            birthed: false,
        }
    }

    pub fn new_node<S1: Into<String>, S2: Into<String>>(group_id: S1, node_id: S2) -> Self {
        Self::new(EntityId::node(group_id, node_id))
    }

    pub fn new_device<S1, S2, S3>(group_id: S1, node_id: S2, device_id: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self::new(EntityId::device(group_id, node_id, device_id))
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    /// True once a birth has been serialised from, or deserialised into,
    /// this entity.
    pub fn is_birth_published(&self) -> bool {
        self.birthed
    }

    /// Install a metric change listener across all three groups.
    ///
    /// Every non suppressed mutation is delivered to the returned receiver.
    /// Calling this again replaces any previous listener.
    pub fn events(&mut self) -> UnboundedReceiver<MetricEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.attributes.set_event_sender(tx.clone());
        self.data.set_event_sender(tx.clone());
        self.commands.set_event_sender(tx);
        rx
    }

    /// Produce a BIRTH payload describing every metric the entity has.
    ///
    /// Metric names are prefixed with their group (`ATTR/`, `DATA/`, `CMD/`)
    /// so the receiving side can rebuild the grouping. Metrics included in
    /// the birth have their updated flags cleared, a data publish straight
    /// after a birth only carries what changed since. The payload has no
    /// sequence number, the session owns that.
    pub fn serialize_birth(&mut self) -> Result<Payload, EmptyEntity> {
        if self.attributes.is_empty() && self.data.is_empty() && self.commands.is_empty() {
            return Err(EmptyEntity);
        }
        let mut metrics = Vec::new();
        for group in [&mut self.attributes, &mut self.data, &mut self.commands] {
            let prefix = group.kind().birth_prefix();
            for metric_value in group.iter_mut() {
                let name = format!("{}{}", prefix, metric_value.name());
                if let Some(metric) = wire_metric(name, metric_value) {
                    metrics.push(metric);
                    metric_value.clear_updated();
                }
            }
        }
        self.birthed = true;
        Ok(Payload {
            timestamp: Some(timestamp()),
            metrics,
            seq: None,
            uuid: None,
            body: None,
        })
    }

    /// Rebuild the metric groups from a received BIRTH payload.
    ///
    /// Group membership is recovered from the name prefixes, metrics without
    /// a known prefix (such as the `bdSeq` session metric) are ignored. No
    /// change notifications fire, a birth replays state rather than
    /// producing new readings.
    pub fn deserialize_birth(&mut self, payload: &Payload) {
        for metric in &payload.metrics {
            let name = match &metric.name {
                Some(name) => name,
                None => {
                    warn!("{}: ignoring unnamed birth metric", self.id);
                    continue;
                }
            };
            if let Some(rest) = name.strip_prefix(constants::ATTR_PREFIX) {
                ingest_metric(&mut self.attributes, rest, metric, true);
            } else if let Some(rest) = name.strip_prefix(constants::DATA_PREFIX) {
                ingest_metric(&mut self.data, rest, metric, true);
            } else if let Some(rest) = name.strip_prefix(constants::CMD_PREFIX) {
                ingest_metric(&mut self.commands, rest, metric, true);
            } else {
                debug!("{}: ignoring unprefixed birth metric {}", self.id, name);
            }
        }
        self.birthed = true;
    }

    /// Produce a DATA payload from the `data` group.
    ///
    /// Only metrics with an unread update are included unless `force_all` is
    /// set. Included metrics have their updated flags cleared. Names are
    /// plain, prefixes are a birth concern.
    pub fn serialize_data(&mut self, force_all: bool) -> Result<Payload, PublishError> {
        Self::serialize_group(&mut self.data, force_all)
    }

    /// Apply a received DATA payload to the `data` group, firing change
    /// notifications.
    pub fn deserialize_data(&mut self, payload: &Payload) {
        for metric in &payload.metrics {
            match &metric.name {
                Some(name) => ingest_metric(&mut self.data, name, metric, false),
                None => warn!("{}: ignoring unnamed data metric", self.id),
            }
        }
    }

    /// Produce a CMD payload from the `commands` group, symmetric to
    /// [serialize_data](Self::serialize_data).
    pub fn serialize_commands(&mut self, force_all: bool) -> Result<Payload, PublishError> {
        Self::serialize_group(&mut self.commands, force_all)
    }

    /// Apply a received CMD payload to the `commands` group.
    ///
    /// Commands are filtered rather than trusted: a metric whose name was
    /// never declared in the `commands` group, or whose value kind disagrees
    /// with the declared one, is dropped with a warning. The remaining
    /// commands are applied and returned so the caller can act on them. An
    /// empty return means nothing survived.
    pub fn deserialize_commands(&mut self, payload: &Payload) -> Vec<CommandUpdate> {
        let mut updates = Vec::new();
        for metric in &payload.metrics {
            let name = match &metric.name {
                Some(name) => name,
                None => {
                    warn!("{}: ignoring unnamed command metric", self.id);
                    continue;
                }
            };
            if !self.commands.contains(name) {
                warn!("{}: ignoring command for unknown metric {}", self.id, name);
                continue;
            }
            let value = match decode_wire_value(metric, name) {
                Some(value) => value,
                None => continue,
            };
            let mismatched = self
                .commands
                .peek(name)
                .map(|current| !value.same_kind(current))
                .unwrap_or(true);
            if mismatched {
                warn!(
                    "{}: ignoring command for {} with mismatched value kind",
                    self.id, name
                );
                continue;
            }
            let time = metric.timestamp.unwrap_or_else(timestamp);
            self.commands.set(name, Some(value.clone()), Some(time));
            updates.push(CommandUpdate {
                name: name.clone(),
                value,
                timestamp: time,
            });
        }
        updates
    }

    fn serialize_group(group: &mut MetricGroup, force_all: bool) -> Result<Payload, PublishError> {
        let mut metrics = Vec::new();
        for metric_value in group.iter_mut() {
            if !force_all && !metric_value.is_updated() {
                continue;
            }
            if let Some(metric) = wire_metric(metric_value.name().into(), metric_value) {
                metrics.push(metric);
                metric_value.clear_updated();
            }
        }
        if metrics.is_empty() {
            return Err(PublishError::NothingToSend);
        }
        Ok(Payload {
            timestamp: Some(timestamp()),
            metrics,
            seq: None,
            uuid: None,
            body: None,
        })
    }
}

#[derive(Serialize)]
struct EntitySnapshot<'a> {
    group: &'a str,
    node: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<&'a str>,
    attributes: Vec<MetricRecord>,
    data: Vec<MetricRecord>,
    commands: Vec<MetricRecord>,
}

impl fmt::Display for Entity {
    /// The entity as a JSON document, useful for logging and debug dumps.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = EntitySnapshot {
            group: self.id.group_id(),
            node: self.id.node_id(),
            device: self.id.device_id(),
            attributes: self.attributes.to_records(),
            data: self.data.to_records(),
            commands: self.commands.to_records(),
        };
        match serde_json::to_string(&snapshot) {
            Ok(json) => f.write_str(&json),
            Err(_) => Err(fmt::Error),
        }
    }
}

/// Build the wire metric for one [MetricValue]. Series valued metrics fold
/// into a two column `timestamp`/`value` dataset. Returns `None`, with a
/// warning, when the value cannot be represented on the wire.
fn wire_metric(name: String, value: &MetricValue) -> Option<Metric> {
    let (datatype, wire_value) = if value.is_list_valued() {
        let (values, timestamps) = value.series();
        let dataset = match fold_series(values, timestamps) {
            Some(dataset) => dataset,
            None => {
                warn!(
                    "dropping series metric {}: element kind has no dataset representation",
                    name
                );
                return None;
            }
        };
        match dataset.to_proto() {
            Ok(proto) => (DataType::DataSet, metric::Value::DatasetValue(proto)),
            Err(e) => {
                warn!("dropping series metric {}: {}", name, e);
                return None;
            }
        }
    } else {
        match value.peek().to_proto() {
            Ok(proto) => (value.datatype(), proto),
            Err(e) => {
                warn!("dropping metric {}: {}", name, e);
                return None;
            }
        }
    };
    let mut out = Metric::new();
    out.set_timestamp(value.timestamp());
    if let Some(alias) = value.alias() {
        out.set_alias(alias);
    }
    out.set_name(name).set_datatype(datatype).set_value(wire_value);
    Some(out)
}

/// Decode one wire metric into a [MetricKind]. `None` means skip, either a
/// legitimate null or a malformed metric that has already been warned about.
fn decode_wire_value(metric: &Metric, name: &str) -> Option<MetricKind> {
    if metric.is_null == Some(true) {
        return None;
    }
    let value = metric.value.clone()?;
    let code = match metric.datatype {
        Some(code) => code,
        None => {
            warn!("ignoring metric {} without a datatype", name);
            return None;
        }
    };
    let datatype = match DataType::try_from(code) {
        Ok(datatype) => datatype,
        Err(_) => {
            warn!("ignoring metric {} with unknown datatype code {}", name, code);
            return None;
        }
    };
    match MetricKind::try_from_proto(datatype, value) {
        Ok(kind) => Some(kind),
        Err(e) => {
            warn!("ignoring metric {}: {}", name, e);
            None
        }
    }
}

fn ingest_metric(group: &mut MetricGroup, name: &str, metric: &Metric, quiet: bool) {
    let kind = match decode_wire_value(metric, name) {
        Some(kind) => kind,
        None => return,
    };
    if let MetricKind::DataSet(dataset) = &kind {
        if let Some((values, timestamps)) = unfold_series(dataset) {
            if quiet {
                group.set_series_quiet(name, values, timestamps);
            } else {
                group.set_series(name, values, timestamps);
            }
            apply_alias(group, name, metric);
            return;
        }
    }
    if quiet {
        group.set_quiet(name, Some(kind), metric.timestamp);
    } else {
        group.set(name, Some(kind), metric.timestamp);
    }
    apply_alias(group, name, metric);
}

fn apply_alias(group: &mut MetricGroup, name: &str, metric: &Metric) {
    if let Some(alias) = metric.alias {
        if let Some(stored) = group.get_mut(name) {
            stored.set_alias(alias);
        }
    }
}

fn series_cell(value: &MetricKind) -> Option<DataSetValue> {
    match value {
        MetricKind::Int(v) => Some(DataSetValue::Int(*v)),
        MetricKind::Double(v) => Some(DataSetValue::Double(*v)),
        MetricKind::Bool(v) => Some(DataSetValue::Bool(*v)),
        MetricKind::Text(v) => Some(DataSetValue::Text(v.clone())),
        MetricKind::Uuid(v) => Some(DataSetValue::Text(v.clone())),
        MetricKind::DateTime(v) => Some(DataSetValue::Int(v.date_time as i64)),
        MetricKind::Bytes(_) | MetricKind::DataSet(_) | MetricKind::File(_) => None,
    }
}

fn cell_value(cell: &DataSetValue) -> MetricKind {
    match cell {
        DataSetValue::Int(v) => MetricKind::Int(*v),
        DataSetValue::Double(v) => MetricKind::Double(*v),
        DataSetValue::Bool(v) => MetricKind::Bool(*v),
        DataSetValue::Text(v) => MetricKind::Text(v.clone()),
    }
}

fn fold_series(values: &[MetricKind], timestamps: &[u64]) -> Option<DataSet> {
    let mut ts_column = Vec::with_capacity(values.len());
    let mut value_column = Vec::with_capacity(values.len());
    for (value, time) in values.iter().zip(timestamps) {
        value_column.push(series_cell(value)?);
        ts_column.push(DataSetValue::Int(*time as i64));
    }
    DataSet::from_columns([
        (SERIES_TIMESTAMP_COLUMN, ts_column),
        (SERIES_VALUE_COLUMN, value_column),
    ])
    .ok()
}

/// The inverse of [fold_series]. `None` when the dataset is not the two
/// column series form, in which case it stays a plain dataset value.
fn unfold_series(dataset: &DataSet) -> Option<(Vec<MetricKind>, Vec<u64>)> {
    if dataset.column_names() != [SERIES_TIMESTAMP_COLUMN, SERIES_VALUE_COLUMN] {
        return None;
    }
    let ts_column = dataset.column(SERIES_TIMESTAMP_COLUMN)?;
    let value_column = dataset.column(SERIES_VALUE_COLUMN)?;
    let mut timestamps = Vec::with_capacity(ts_column.len());
    for cell in ts_column {
        match cell {
            DataSetValue::Int(v) => timestamps.push(*v as u64),
            _ => return None,
        }
    }
    let values = value_column.iter().map(cell_value).collect();
    Some((values, timestamps))
}

#[cfg(test)]
mod tests {

    use super::*;

    fn test_entity() -> Entity {
        Entity::new_node("factory", "press")
    }

    fn metric_names(payload: &Payload) -> Vec<String> {
        payload
            .metrics
            .iter()
            .filter_map(|m| m.name.clone())
            .collect()
    }

    #[test]
    fn birth_prefixes_metrics_by_group() {
        let mut entity = test_entity();
        entity
            .attributes
            .set("version", Some(MetricKind::Text("1.0".into())), Some(1));
        entity.data.set("temp", Some(MetricKind::Double(20.0)), Some(1));
        entity
            .commands
            .set("reboot", Some(MetricKind::Bool(false)), Some(1));

        let payload = entity.serialize_birth().unwrap();
        assert_eq!(
            metric_names(&payload),
            vec!["ATTR/version", "DATA/temp", "CMD/reboot"]
        );
        assert!(payload.timestamp.is_some());
        assert_eq!(payload.seq, None);
        assert!(entity.is_birth_published());
    }

    #[test]
    fn empty_entity_cannot_birth() {
        let mut entity = test_entity();
        assert_eq!(entity.serialize_birth(), Err(EmptyEntity));
        assert!(!entity.is_birth_published());
    }

    #[test]
    fn data_after_birth_only_carries_changes() {
        let mut entity = test_entity();
        entity.data.set("temp", Some(MetricKind::Double(20.0)), Some(1));
        entity.data.set("rpm", Some(MetricKind::Int(100)), Some(1));
        entity.serialize_birth().unwrap();

        assert!(matches!(
            entity.serialize_data(false),
            Err(PublishError::NothingToSend)
        ));

        entity.data.set("rpm", Some(MetricKind::Int(150)), Some(2));
        let payload = entity.serialize_data(false).unwrap();
        assert_eq!(metric_names(&payload), vec!["rpm"]);

        let payload = entity.serialize_data(true).unwrap();
        assert_eq!(metric_names(&payload), vec!["temp", "rpm"]);
    }

    #[test]
    fn birth_round_trips_groups_and_values() {
        let mut source = test_entity();
        source
            .attributes
            .set("version", Some(MetricKind::Text("1.0".into())), Some(1));
        source.data.set("temp", Some(MetricKind::Double(20.5)), Some(2));
        source
            .commands
            .set("reboot", Some(MetricKind::Bool(false)), Some(3));
        let birth = source.serialize_birth().unwrap();

        let mut mirror = test_entity();
        mirror.deserialize_birth(&birth);
        assert_eq!(
            mirror.attributes.peek("version"),
            Some(&MetricKind::Text("1.0".into()))
        );
        assert_eq!(mirror.data.peek("temp"), Some(&MetricKind::Double(20.5)));
        assert_eq!(mirror.commands.peek("reboot"), Some(&MetricKind::Bool(false)));
        assert!(mirror.is_birth_published());
    }

    #[test]
    fn birth_replay_is_suppressed_but_data_is_not() {
        let mut source = test_entity();
        source.data.set("temp", Some(MetricKind::Double(20.5)), Some(2));
        let birth = source.serialize_birth().unwrap();
        source.data.set("temp", Some(MetricKind::Double(21.0)), Some(3));
        let data = source.serialize_data(false).unwrap();

        let mut mirror = test_entity();
        let mut events = mirror.events();
        mirror.deserialize_birth(&birth);
        assert!(events.try_recv().is_err());

        mirror.deserialize_data(&data);
        let event = events.try_recv().expect("data ingest should notify");
        assert_eq!(event.group, GroupKind::Data);
        assert_eq!(event.name, "temp");
        assert_eq!(event.value, MetricKind::Double(21.0));
    }

    #[test]
    fn bdseq_in_a_birth_is_ignored() {
        let mut source = test_entity();
        source.data.set("temp", Some(MetricKind::Double(1.0)), Some(1));
        let mut birth = source.serialize_birth().unwrap();
        let mut bdseq = Metric::new();
        bdseq
            .set_name(constants::BDSEQ.into())
            .set_datatype(DataType::Int64)
            .set_value(metric::Value::LongValue(3));
        birth.metrics.insert(0, bdseq);

        let mut mirror = test_entity();
        mirror.deserialize_birth(&birth);
        assert_eq!(mirror.data.names(), vec!["temp"]);
        assert!(mirror.attributes.is_empty());
        assert!(mirror.commands.is_empty());
    }

    #[test]
    fn commands_filter_unknown_names_and_kind_mismatches() {
        let mut entity = test_entity();
        entity
            .commands
            .set("reboot", Some(MetricKind::Bool(false)), Some(1));
        entity
            .commands
            .set("setpoint", Some(MetricKind::Double(10.0)), Some(1));

        let mut remote = test_entity();
        remote.commands.set("reboot", Some(MetricKind::Int(1)), Some(2));
        remote
            .commands
            .set("unknown", Some(MetricKind::Bool(true)), Some(2));
        remote
            .commands
            .set("setpoint", Some(MetricKind::Double(12.5)), Some(2));
        let payload = remote.serialize_commands(true).unwrap();

        let updates = entity.deserialize_commands(&payload);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].name, "setpoint");
        assert_eq!(updates[0].value, MetricKind::Double(12.5));
        assert_eq!(entity.commands.peek("reboot"), Some(&MetricKind::Bool(false)));
        assert_eq!(
            entity.commands.peek("setpoint"),
            Some(&MetricKind::Double(12.5))
        );
    }

    #[test]
    fn all_commands_filtered_returns_empty() {
        let mut entity = test_entity();
        entity
            .commands
            .set("reboot", Some(MetricKind::Bool(false)), Some(1));

        let mut remote = test_entity();
        remote.commands.set("other", Some(MetricKind::Bool(true)), Some(2));
        let payload = remote.serialize_commands(true).unwrap();

        assert!(entity.deserialize_commands(&payload).is_empty());
    }

    #[test]
    fn series_folds_to_a_dataset_and_back() {
        let mut source = test_entity();
        source.data.set_series(
            "samples",
            vec![MetricKind::Int(1), MetricKind::Int(2), MetricKind::Int(3)],
            vec![10, 20, 30],
        );
        let birth = source.serialize_birth().unwrap();
        assert_eq!(
            birth.metrics[0].datatype,
            Some(DataType::DataSet as u32)
        );

        let mut mirror = test_entity();
        mirror.deserialize_birth(&birth);
        let stored = mirror.data.get("samples").expect("series should ingest");
        assert!(stored.is_list_valued());
        let (values, timestamps) = stored.series();
        assert_eq!(
            values,
            &[MetricKind::Int(1), MetricKind::Int(2), MetricKind::Int(3)]
        );
        assert_eq!(timestamps, &[10, 20, 30]);
    }

    #[test]
    fn plain_datasets_are_not_mistaken_for_series() {
        let ds = DataSet::from_columns([
            ("left", vec![DataSetValue::Int(1)]),
            ("right", vec![DataSetValue::Int(2)]),
        ])
        .unwrap();
        let mut source = test_entity();
        source
            .data
            .set("table", Some(MetricKind::DataSet(ds.clone())), Some(1));
        let birth = source.serialize_birth().unwrap();

        let mut mirror = test_entity();
        mirror.deserialize_birth(&birth);
        assert_eq!(mirror.data.peek("table"), Some(&MetricKind::DataSet(ds)));
    }

    #[test]
    fn null_metrics_are_skipped_on_ingest() {
        let mut entity = test_entity();
        let mut payload = Payload::default();
        let mut metric = Metric::new();
        metric.set_name("temp".into()).set_datatype(DataType::Double);
        payload.metrics.push(metric);
        entity.deserialize_data(&payload);
        assert!(entity.data.is_empty());
    }

    #[test]
    fn display_is_a_json_snapshot() {
        let mut entity = Entity::new_device("factory", "press", "sensor-1");
        entity.data.set("temp", Some(MetricKind::Double(20.0)), Some(1));
        let json: serde_json::Value =
            serde_json::from_str(&entity.to_string()).expect("display should be valid json");
        assert_eq!(json["group"], "factory");
        assert_eq!(json["node"], "press");
        assert_eq!(json["device"], "sensor-1");
        assert_eq!(json["data"][0]["name"], "temp");
        assert_eq!(json["data"][0]["value"], 20.0);
    }
}
