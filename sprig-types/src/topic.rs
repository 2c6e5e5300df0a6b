use std::fmt;

use thiserror::Error;

use crate::constants::{
    DBIRTH, DCMD, DDATA, DDEATH, NBIRTH, NCMD, NDATA, NDEATH, SPBV10, STATE,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceMessage {
    DBirth,
    DDeath,
    DData,
    DCmd,
}

impl DeviceMessage {
    fn as_str(&self) -> &str {
        match self {
            DeviceMessage::DBirth => DBIRTH,
            DeviceMessage::DDeath => DDEATH,
            DeviceMessage::DData => DDATA,
            DeviceMessage::DCmd => DCMD,
        }
    }

    fn from_str(value: &str) -> Option<Self> {
        match value {
            DBIRTH => Some(DeviceMessage::DBirth),
            DDEATH => Some(DeviceMessage::DDeath),
            DDATA => Some(DeviceMessage::DData),
            DCMD => Some(DeviceMessage::DCmd),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeMessage {
    NBirth,
    NDeath,
    NData,
    NCmd,
}

impl NodeMessage {
    fn as_str(&self) -> &str {
        match self {
            NodeMessage::NBirth => NBIRTH,
            NodeMessage::NDeath => NDEATH,
            NodeMessage::NData => NDATA,
            NodeMessage::NCmd => NCMD,
        }
    }

    fn from_str(value: &str) -> Option<Self> {
        match value {
            NBIRTH => Some(NodeMessage::NBirth),
            NDEATH => Some(NodeMessage::NDeath),
            NDATA => Some(NodeMessage::NData),
            NCMD => Some(NodeMessage::NCmd),
            _ => None,
        }
    }
}

/// Reason a topic string could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    #[error("topic namespace '{0}' is not recognised")]
    UnknownNamespace(String),
    #[error("topic must contain at least 3 segments, got {0}")]
    TooFewSegments(usize),
    #[error("topic contains an empty segment")]
    EmptySegment,
    #[error("'{0}' is not a sparkplug message type")]
    UnknownMessageType(String),
    #[error("topic has trailing segments after the entity name")]
    TrailingSegments,
}

/// A fully parsed sparkplug topic.
///
/// The host STATE form reserves the second topic segment, so a group can
/// never be named `STATE`.
#[derive(Clone, Debug, PartialEq)]
pub enum TopicName {
    Node {
        group_id: String,
        message_type: NodeMessage,
        node_id: String,
    },
    Device {
        group_id: String,
        message_type: DeviceMessage,
        node_id: String,
        device_id: String,
    },
    State {
        host_id: String,
    },
}

impl TopicName {
    /// Parse a topic string of the form
    /// `spBv1.0/<group>/<message_type>/<node>[/<device>]` or
    /// `spBv1.0/STATE/<host>`.
    pub fn parse(topic: &str) -> Result<Self, TopicError> {
        let segments: Vec<&str> = topic.split('/').collect();
        if segments.len() < 3 {
            return Err(TopicError::TooFewSegments(segments.len()));
        }
        if segments.iter().any(|s| s.is_empty()) {
            return Err(TopicError::EmptySegment);
        }
        if segments[0] != SPBV10 {
            return Err(TopicError::UnknownNamespace(segments[0].into()));
        }

        if segments[1] == STATE {
            if segments.len() > 3 {
                return Err(TopicError::TrailingSegments);
            }
            return Ok(TopicName::State {
                host_id: segments[2].into(),
            });
        }

        if let Some(message_type) = NodeMessage::from_str(segments[2]) {
            if segments.len() < 4 {
                return Err(TopicError::TooFewSegments(segments.len()));
            }
            if segments.len() > 4 {
                return Err(TopicError::TrailingSegments);
            }
            return Ok(TopicName::Node {
                group_id: segments[1].into(),
                message_type,
                node_id: segments[3].into(),
            });
        }

        if let Some(message_type) = DeviceMessage::from_str(segments[2]) {
            if segments.len() < 5 {
                return Err(TopicError::TooFewSegments(segments.len()));
            }
            if segments.len() > 5 {
                return Err(TopicError::TrailingSegments);
            }
            return Ok(TopicName::Device {
                group_id: segments[1].into(),
                message_type,
                node_id: segments[3].into(),
                device_id: segments[4].into(),
            });
        }

        Err(TopicError::UnknownMessageType(segments[2].into()))
    }

    pub fn group_id(&self) -> Option<&str> {
        match self {
            TopicName::Node { group_id, .. } => Some(group_id),
            TopicName::Device { group_id, .. } => Some(group_id),
            TopicName::State { .. } => None,
        }
    }

    pub fn node_id(&self) -> Option<&str> {
        match self {
            TopicName::Node { node_id, .. } => Some(node_id),
            TopicName::Device { node_id, .. } => Some(node_id),
            TopicName::State { .. } => None,
        }
    }

    pub fn device_id(&self) -> Option<&str> {
        match self {
            TopicName::Device { device_id, .. } => Some(device_id),
            _ => None,
        }
    }

    /// The name of the entity the topic addresses, the device name if one
    /// is present and the node name otherwise
    pub fn entity_name(&self) -> &str {
        match self {
            TopicName::Node { node_id, .. } => node_id,
            TopicName::Device { device_id, .. } => device_id,
            TopicName::State { host_id } => host_id,
        }
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicName::Node {
                group_id,
                message_type,
                node_id,
            } => write!(f, "{}", node_topic(group_id, message_type, node_id)),
            TopicName::Device {
                group_id,
                message_type,
                node_id,
                device_id,
            } => write!(
                f,
                "{}",
                device_topic(group_id, message_type, node_id, device_id)
            ),
            TopicName::State { host_id } => write!(f, "{}", state_host_topic(host_id)),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NodeTopic {
    pub topic: String,
    pub message_type: NodeMessage,
    pub retain: bool,
}

impl NodeTopic {
    pub fn new(group_id: &str, message_type: NodeMessage, node_id: &str) -> Self {
        Self {
            topic: node_topic(group_id, &message_type, node_id),
            message_type,
            retain: false,
        }
    }

    /// Request the broker retain the published message. Only meaningful
    /// for BIRTH messages.
    pub fn retained(mut self) -> Self {
        self.retain = true;
        self
    }

    pub fn get_publish_quality_retain(&self) -> (QoS, bool) {
        (QoS::AtMostOnce, self.retain)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeviceTopic {
    pub topic: String,
    pub message_type: DeviceMessage,
    pub retain: bool,
}

impl DeviceTopic {
    pub fn new(
        group_id: &str,
        message_type: DeviceMessage,
        node_id: &str,
        device_id: &str,
    ) -> Self {
        Self {
            topic: device_topic(group_id, &message_type, node_id, device_id),
            message_type,
            retain: false,
        }
    }

    pub fn retained(mut self) -> Self {
        self.retain = true;
        self
    }

    pub fn get_publish_quality_retain(&self) -> (QoS, bool) {
        (QoS::AtMostOnce, self.retain)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StateTopic {
    pub topic: String,
}

impl StateTopic {
    /// Wildcard form matching the STATE topic of every host
    pub fn new() -> Self {
        Self {
            topic: state_sub_topic(),
        }
    }

    pub fn new_host(host_id: &str) -> Self {
        Self {
            topic: state_host_topic(host_id),
        }
    }

    pub fn get_publish_quality_retain(&self) -> (QoS, bool) {
        (QoS::AtLeastOnce, true)
    }
}

impl Default for StateTopic {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Topic {
    NodeTopic(NodeTopic),
    DeviceTopic(DeviceTopic),
    State(StateTopic),
    Node { group_id: String, node_id: String },
    Group { id: String },
    Namespace,
}

impl From<Topic> for String {
    fn from(topic: Topic) -> String {
        match topic {
            Topic::NodeTopic(node_topic) => node_topic.topic,
            Topic::DeviceTopic(device_topic) => device_topic.topic,
            Topic::State(state_topic) => state_topic.topic,
            Topic::Node { group_id, node_id } => format!("{}/{}/+/{}/#", SPBV10, group_id, node_id),
            Topic::Group { id } => format!("{}/{}/#", SPBV10, id),
            Topic::Namespace => format!("{}/#", SPBV10),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TopicFilter {
    pub topic: Topic,
    pub qos: QoS,
}

impl TopicFilter {
    pub fn new(topic: Topic) -> Self {
        Self::new_with_qos(topic, QoS::AtMostOnce)
    }

    pub fn new_with_qos(topic: Topic, qos: QoS) -> Self {
        Self { topic, qos }
    }
}

pub fn node_topic(group_id: &str, message_type: &NodeMessage, node_id: &str) -> String {
    format!(
        "{}/{}/{}/{}",
        SPBV10,
        group_id,
        message_type.as_str(),
        node_id
    )
}

pub fn device_topic(
    group_id: &str,
    message_type: &DeviceMessage,
    node_id: &str,
    device_id: &str,
) -> String {
    format!(
        "{}/{}/{}/{}/{}",
        SPBV10,
        group_id,
        message_type.as_str(),
        node_id,
        device_id
    )
}

pub fn state_host_topic(host_id: &str) -> String {
    format!("{}/{}/{}", SPBV10, STATE, host_id)
}

pub fn state_sub_topic() -> String {
    state_host_topic("+")
}
