use std::string::FromUtf8Error;

use prost::DecodeError;
use sprig_types::{
    payload::{Message as _, Payload, StatePayload},
    topic::{
        state_host_topic, DeviceMessage as DeviceMessageType, DeviceTopic,
        NodeMessage as NodeMessageType, NodeTopic, QoS, TopicError,
    },
};
use thiserror::Error;

/// Error types for message processing operations.
///
/// This enum represents the various error conditions that can occur
/// when decoding sparkplug protobuf payloads, validating topics, or handling payloads.
#[derive(Error, Debug, PartialEq)]
pub enum MessageError {
    #[error("There was an error decoding the payload: {0}")]
    DecodePayloadError(DecodeError),
    #[error("The topic was invalid: {0}")]
    InvalidSparkplugTopic(#[from] TopicError),
    #[error("Topic parts utf8 decode error: {0}")]
    TopicUtf8Error(#[from] FromUtf8Error),
    #[error("The state payload was neither protobuf nor an ONLINE/OFFLINE literal")]
    InvalidStatePayload,
}

/// An enum representing the different type of message.
#[derive(Debug, PartialEq)]
pub enum MessageKind {
    Birth,
    Death,
    Cmd,
    Data,
}

impl From<NodeMessageType> for MessageKind {
    fn from(value: NodeMessageType) -> Self {
        match value {
            NodeMessageType::NBirth => MessageKind::Birth,
            NodeMessageType::NDeath => MessageKind::Death,
            NodeMessageType::NCmd => MessageKind::Cmd,
            NodeMessageType::NData => MessageKind::Data,
        }
    }
}

impl From<DeviceMessageType> for MessageKind {
    fn from(value: DeviceMessageType) -> Self {
        match value {
            DeviceMessageType::DBirth => MessageKind::Birth,
            DeviceMessageType::DDeath => MessageKind::Death,
            DeviceMessageType::DCmd => MessageKind::Cmd,
            DeviceMessageType::DData => MessageKind::Data,
        }
    }
}

/// A Message structure containing payload and the type of topic it was received on
#[derive(Debug, PartialEq)]
pub struct Message {
    pub payload: Payload,
    pub kind: MessageKind,
}

/// A message published on a STATE topic.
///
/// Host certificates are the bare ASCII literals, but some stacks publish a
/// full protobuf payload on their STATE topic, so both decodes are kept.
#[derive(Debug, Clone, PartialEq)]
pub enum StateMessage {
    Simple(StatePayload),
    Payload(Payload),
}

impl StateMessage {
    /// Decode a STATE payload, protobuf first and the ONLINE/OFFLINE
    /// literals as the fallback.
    pub fn decode(payload: &[u8]) -> Result<Self, MessageError> {
        match Payload::decode(payload) {
            Ok(decoded) => Ok(StateMessage::Payload(decoded)),
            Err(_) => match StatePayload::try_from(payload) {
                Ok(state) => Ok(StateMessage::Simple(state)),
                Err(_) => Err(MessageError::InvalidStatePayload),
            },
        }
    }

    /// The certificate carried by this message, if it is one
    pub fn certificate(&self) -> Option<StatePayload> {
        match self {
            StateMessage::Simple(state) => Some(*state),
            StateMessage::Payload(_) => None,
        }
    }
}

/// Represents a message from a Node.
#[derive(Debug, PartialEq)]
pub struct NodeMessage {
    /// The group the node belongs to.
    pub group_id: String,
    /// The nodes unique identifier.
    pub node_id: String,
    /// The message.
    pub message: Message,
}

/// Represents a message from a Device.
#[derive(Debug, PartialEq)]
pub struct DeviceMessage {
    /// The group the node belongs to.
    pub group_id: String,
    /// The nodes unique identifier.
    pub node_id: String,
    /// The devices unique identifier.
    pub device_id: String,
    /// The message.
    pub message: Message,
}

/// An enum that represents the different types of events an [EventLoop](crate::EventLoop) implementation can produce.
#[derive(Debug, PartialEq)]
pub enum Event {
    Offline,
    Online,
    Node(NodeMessage),
    Device(DeviceMessage),
    State {
        host_id: String,
        message: StateMessage,
    },
    InvalidPublish {
        reason: MessageError,
        topic: Vec<u8>,
        payload: Vec<u8>,
    },
}

/// Structure representing the last will of a Node, Device or Application
#[derive(Debug, Clone, PartialEq)]
pub struct LastWill {
    pub topic: String,
    pub retain: bool,
    pub qos: QoS,
    pub payload: Vec<u8>,
}

impl LastWill {
    pub fn new_node(group: &str, node_id: &str, payload: Payload) -> Self {
        let topic = NodeTopic::new(group, NodeMessageType::NDeath, node_id);
        let (qos, retain) = topic.get_publish_quality_retain();
        Self {
            retain,
            qos,
            payload: payload.into(),
            topic: topic.topic,
        }
    }

    pub fn new_device(group: &str, node_id: &str, device_id: &str, payload: Payload) -> Self {
        let topic = DeviceTopic::new(group, DeviceMessageType::DDeath, node_id, device_id);
        let (qos, retain) = topic.get_publish_quality_retain();
        Self {
            retain,
            qos,
            payload: payload.into(),
            topic: topic.topic,
        }
    }

    pub fn new_app(host_id: &str) -> Self {
        Self {
            topic: state_host_topic(host_id),
            retain: true,
            qos: QoS::AtLeastOnce,
            payload: StatePayload::Offline.into(),
        }
    }
}
