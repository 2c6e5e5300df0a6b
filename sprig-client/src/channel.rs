use std::sync::{Arc, Mutex};

use crate::{Event, LastWill};
use async_trait::async_trait;
use sprig_types::{
    payload::{Payload, StatePayload},
    topic::{DeviceTopic, NodeTopic, StateTopic, TopicFilter},
};
use tokio::sync::mpsc;

/// Everything a [ChannelClient] can emit, delivered to the broker side in
/// publish order.
#[derive(Clone, Debug, PartialEq)]
pub enum OutboundMessage {
    Disconnect,
    StateMessage {
        topic: StateTopic,
        payload: StatePayload,
    },
    NodeMessage {
        topic: NodeTopic,
        payload: Payload,
    },
    DeviceMessage {
        topic: DeviceTopic,
        payload: Payload,
    },
    Subscribe(Vec<TopicFilter>),
}

/// A [Client](crate::Client) whose publishes land on a channel instead of a
/// network.
///
/// Payloads stay in their decoded form, so assertions on the broker side do
/// not need to re-parse protobuf.
#[derive(Clone)]
pub struct ChannelClient {
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl ChannelClient {
    fn send(&self, message: OutboundMessage) -> Result<(), ()> {
        self.outbound_tx.send(message).map_err(|_| ())
    }
}

#[async_trait]
impl crate::Client for ChannelClient {
    async fn disconnect(&self) -> Result<(), ()> {
        self.send(OutboundMessage::Disconnect)
    }

    async fn publish_state_message(
        &self,
        topic: StateTopic,
        payload: StatePayload,
    ) -> Result<(), ()> {
        self.send(OutboundMessage::StateMessage { topic, payload })
    }

    async fn try_publish_state_message(
        &self,
        topic: StateTopic,
        payload: StatePayload,
    ) -> Result<(), ()> {
        self.send(OutboundMessage::StateMessage { topic, payload })
    }

    async fn publish_node_message(&self, topic: NodeTopic, payload: Payload) -> Result<(), ()> {
        self.send(OutboundMessage::NodeMessage { topic, payload })
    }

    async fn try_publish_node_message(&self, topic: NodeTopic, payload: Payload) -> Result<(), ()> {
        self.send(OutboundMessage::NodeMessage { topic, payload })
    }

    async fn publish_device_message(&self, topic: DeviceTopic, payload: Payload) -> Result<(), ()> {
        self.send(OutboundMessage::DeviceMessage { topic, payload })
    }

    async fn try_publish_device_message(
        &self,
        topic: DeviceTopic,
        payload: Payload,
    ) -> Result<(), ()> {
        self.send(OutboundMessage::DeviceMessage { topic, payload })
    }

    async fn subscribe_many(&self, topics: Vec<TopicFilter>) -> Result<(), ()> {
        self.send(OutboundMessage::Subscribe(topics))
    }
}

/// The test's side of a [ChannelClient]/[ChannelEventLoop] pair.
///
/// Push [Event]s at the code under test through `tx_event`, pull what it
/// published from `rx_outbound`, and inspect the will it registered with
/// [last_will](ChannelBroker::last_will).
///
/// # Examples
///
/// ```no_run
/// use sprig_client::{Event, channel::{ChannelEventLoop, OutboundMessage}};
///
/// # async fn demo() {
/// let (eventloop, client, mut broker) = ChannelEventLoop::new();
///
/// // hand eventloop and client to the code under test, then drive it
/// broker.tx_event.send(Event::Online).unwrap();
/// match broker.rx_outbound.recv().await.unwrap() {
///     OutboundMessage::Subscribe(filters) => println!("subscribed {filters:?}"),
///     other => panic!("expected a subscribe, got {other:?}"),
/// }
/// # }
/// ```
pub struct ChannelBroker {
    pub rx_outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    pub tx_event: mpsc::UnboundedSender<Event>,
    last_will: Arc<Mutex<Option<LastWill>>>,
}

impl ChannelBroker {
    /// The most recent will the event loop side was given, if any.
    pub fn last_will(&self) -> Option<LastWill> {
        self.last_will.lock().unwrap().clone()
    }
}

/// An [EventLoop](crate::EventLoop) that replays whatever the paired
/// [ChannelBroker] feeds it.
pub struct ChannelEventLoop {
    event_rx: mpsc::UnboundedReceiver<Event>,
    last_will: Arc<Mutex<Option<LastWill>>>,
}

impl ChannelEventLoop {
    /// Creates an event loop, client and broker wired to each other.
    pub fn new() -> (Self, ChannelClient, ChannelBroker) {
        let (tx_event, event_rx) = mpsc::unbounded_channel();
        let (outbound_tx, rx_outbound) = mpsc::unbounded_channel();
        let last_will = Arc::new(Mutex::new(None));
        let eventloop = Self {
            event_rx,
            last_will: last_will.clone(),
        };
        let client = ChannelClient { outbound_tx };
        let broker = ChannelBroker {
            rx_outbound,
            tx_event,
            last_will,
        };
        (eventloop, client, broker)
    }
}

#[async_trait]
impl crate::EventLoop for ChannelEventLoop {
    async fn poll(&mut self) -> Option<Event> {
        self.event_rx.recv().await
    }

    fn set_last_will(&mut self, will: LastWill) {
        *self.last_will.lock().unwrap() = Some(will)
    }
}
