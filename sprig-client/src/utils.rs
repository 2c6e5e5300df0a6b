use crate::{DeviceMessage, Event, Message, MessageError, NodeMessage, StateMessage};

use prost::Message as ProstMessage;
use sprig_types::{payload::Payload, topic::TopicName};

/// Turn a raw MQTT publish into an [Event].
///
/// The topic decides how the payload is decoded, STATE topics get the
/// certificate decode, everything else is a protobuf payload.
pub fn topic_and_payload_to_event(topic: &[u8], payload: &[u8]) -> Result<Event, MessageError> {
    let topic = String::from_utf8(topic.to_vec())?;
    let event = match TopicName::parse(&topic)? {
        TopicName::State { host_id } => Event::State {
            host_id,
            message: StateMessage::decode(payload)?,
        },
        TopicName::Node {
            group_id,
            message_type,
            node_id,
        } => {
            let payload =
                Payload::decode(payload).map_err(MessageError::DecodePayloadError)?;
            Event::Node(NodeMessage {
                group_id,
                node_id,
                message: Message {
                    payload,
                    kind: message_type.into(),
                },
            })
        }
        TopicName::Device {
            group_id,
            message_type,
            node_id,
            device_id,
        } => {
            let payload =
                Payload::decode(payload).map_err(MessageError::DecodePayloadError)?;
            Event::Device(DeviceMessage {
                group_id,
                node_id,
                device_id,
                message: Message {
                    payload,
                    kind: message_type.into(),
                },
            })
        }
    };
    Ok(event)
}
