use std::{
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use log::{debug, error, info, warn};
use sprig_client::{
    DeviceMessage, DynClient, DynEventLoop, Event, LastWill, Message, MessageKind, NodeMessage,
    StateMessage,
};
use sprig_types::{
    constants,
    payload::{metric, DataType, Metric, Payload},
    topic::{
        DeviceMessage as DeviceMessageType, DeviceTopic, NodeMessage as NodeMessageType, NodeTopic,
        QoS, StateTopic, Topic, TopicFilter,
    },
    MetricKind,
};
use tokio::{
    select,
    sync::{mpsc, oneshot, watch},
    time::timeout,
};

use crate::{
    entity::{CommandUpdate, Entity, EntityId},
    error::{PublishError, StateError},
    group::MetricEvent,
    EntityBuilder,
};

/// The birth/death ordering counter carried as an Int64 metric.
fn bdseq_metric(bdseq: u8) -> Metric {
    let mut out = Metric::new();
    out.set_name(constants::BDSEQ.to_string())
        .set_datatype(DataType::Int64)
        .set_value(metric::Value::LongValue(bdseq as u64));
    out
}

/* One entity, one connection. The publish topics differ by role only. */
#[derive(Clone)]
enum EntityTopic {
    Node(NodeTopic),
    Device(DeviceTopic),
}

async fn publish_entity_message(
    client: &Arc<DynClient>,
    topic: EntityTopic,
    payload: Payload,
) -> Result<(), ()> {
    match topic {
        EntityTopic::Node(topic) => client.publish_node_message(topic, payload).await,
        EntityTopic::Device(topic) => client.publish_device_message(topic, payload).await,
    }
}

async fn try_publish_entity_message(
    client: &Arc<DynClient>,
    topic: EntityTopic,
    payload: Payload,
) -> Result<(), ()> {
    match topic {
        EntityTopic::Node(topic) => client.try_publish_node_message(topic, payload).await,
        EntityTopic::Device(topic) => client.try_publish_device_message(topic, payload).await,
    }
}

struct SessionStateInner {
    seq: u8,
    online: bool,
    birthed: bool,
}

pub(crate) struct SessionState {
    running: AtomicBool,
    bdseq: AtomicU8,
    inner: Mutex<SessionStateInner>,
    online_tx: watch::Sender<bool>,
    retain_birth: bool,
    skip_death: bool,
    pub id: EntityId,
}

impl SessionState {
    fn get_next_seq(&self) -> Result<u64, StateError> {
        let mut state = self.inner.lock().unwrap();
        if !state.online {
            return Err(StateError::Offline);
        }
        if !state.birthed {
            return Err(StateError::UnBirthed);
        }
        state.seq = state.seq.wrapping_add(1);
        Ok(state.seq as u64)
    }

    fn online_swap(&self, online: bool) -> bool {
        let mut state = self.inner.lock().unwrap();
        let old_online_state = state.online;
        state.online = online;
        self.online_tx.send_replace(online);
        old_online_state
    }

    fn is_online(&self) -> bool {
        self.inner.lock().unwrap().online
    }

    fn set_dead(&self) {
        let mut state = self.inner.lock().unwrap();
        state.birthed = false;
    }

    fn start_birth(&self) {
        let mut state = self.inner.lock().unwrap();
        state.birthed = false;
        state.seq = 0;
    }

    fn birth_completed(&self) {
        self.inner.lock().unwrap().birthed = true
    }

    fn birth_topic(&self) -> EntityTopic {
        let topic = match self.id.device_id() {
            Some(device_id) => EntityTopic::Device(DeviceTopic::new(
                self.id.group_id(),
                DeviceMessageType::DBirth,
                self.id.node_id(),
                device_id,
            )),
            None => EntityTopic::Node(NodeTopic::new(
                self.id.group_id(),
                NodeMessageType::NBirth,
                self.id.node_id(),
            )),
        };
        if !self.retain_birth {
            return topic;
        }
        match topic {
            EntityTopic::Node(topic) => EntityTopic::Node(topic.retained()),
            EntityTopic::Device(topic) => EntityTopic::Device(topic.retained()),
        }
    }

    fn death_topic(&self) -> EntityTopic {
        match self.id.device_id() {
            Some(device_id) => EntityTopic::Device(DeviceTopic::new(
                self.id.group_id(),
                DeviceMessageType::DDeath,
                self.id.node_id(),
                device_id,
            )),
            None => EntityTopic::Node(NodeTopic::new(
                self.id.group_id(),
                NodeMessageType::NDeath,
                self.id.node_id(),
            )),
        }
    }

    fn data_topic(&self) -> EntityTopic {
        match self.id.device_id() {
            Some(device_id) => EntityTopic::Device(DeviceTopic::new(
                self.id.group_id(),
                DeviceMessageType::DData,
                self.id.node_id(),
                device_id,
            )),
            None => EntityTopic::Node(NodeTopic::new(
                self.id.group_id(),
                NodeMessageType::NData,
                self.id.node_id(),
            )),
        }
    }

    fn generate_death_payload(&self) -> Payload {
        Payload {
            seq: None,
            metrics: vec![bdseq_metric(self.bdseq.load(Ordering::SeqCst))],
            uuid: None,
            timestamp: None,
            body: None,
        }
    }

    fn create_last_will(&self) -> LastWill {
        match self.id.device_id() {
            Some(device_id) => LastWill::new_device(
                self.id.group_id(),
                self.id.node_id(),
                device_id,
                self.generate_death_payload(),
            ),
            None => LastWill::new_node(
                self.id.group_id(),
                self.id.node_id(),
                self.generate_death_payload(),
            ),
        }
    }

    fn sub_topics(&self) -> Vec<TopicFilter> {
        let command_topic = match self.id.device_id() {
            Some(device_id) => Topic::DeviceTopic(DeviceTopic::new(
                self.id.group_id(),
                DeviceMessageType::DCmd,
                self.id.node_id(),
                device_id,
            )),
            None => Topic::NodeTopic(NodeTopic::new(
                self.id.group_id(),
                NodeMessageType::NCmd,
                self.id.node_id(),
            )),
        };
        vec![
            TopicFilter::new_with_qos(command_topic, QoS::AtLeastOnce),
            TopicFilter::new_with_qos(Topic::State(StateTopic::new()), QoS::AtLeastOnce),
        ]
    }
}

#[derive(Debug)]
struct SessionShutdown;

/// A handle for interacting with a running entity session.
///
/// The handle is the application's side of the session: it holds the entity
/// metrics, decides when births and data hit the wire, and can stop the
/// session. Handles are cheap to clone.
#[derive(Clone)]
pub struct EntityHandle {
    state: Arc<SessionState>,
    entity: Arc<Mutex<Entity>>,
    client: Arc<DynClient>,
    stop_tx: mpsc::Sender<SessionShutdown>,
}

impl EntityHandle {
    pub fn entity_id(&self) -> &EntityId {
        &self.state.id
    }

    /// Whether the session currently has a broker connection.
    pub fn connected(&self) -> bool {
        self.state.is_online()
    }

    /// Wait until the session is online, up to `wait`. Returns whether the
    /// session came online in time. Returns immediately when already online.
    pub async fn wait_online(&self, wait: Duration) -> bool {
        let mut online_rx = self.state.online_tx.subscribe();
        let online = matches!(
            timeout(wait, online_rx.wait_for(|online| *online)).await,
            Ok(Ok(_))
        );
        online
    }

    /// Run `f` against the entity behind the handle.
    ///
    /// Useful for anything the convenience setters do not cover, staging a
    /// series or installing a metric change listener for example.
    pub fn update<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Entity) -> R,
    {
        let mut entity = self.entity.lock().unwrap();
        f(&mut entity)
    }

    /// Set a data metric to `value` with the current time.
    pub fn set_data<S: Into<String>, V: Into<MetricKind>>(&self, name: S, value: V) -> bool {
        self.update(|entity| entity.data.set(name, Some(value.into()), None))
    }

    /// Set an attribute metric to `value` with the current time.
    pub fn set_attribute<S: Into<String>, V: Into<MetricKind>>(&self, name: S, value: V) -> bool {
        self.update(|entity| entity.attributes.set(name, Some(value.into()), None))
    }

    /// Declare or set a command metric. The declared value kind doubles as
    /// the filter for inbound commands.
    pub fn set_command<S: Into<String>, V: Into<MetricKind>>(&self, name: S, value: V) -> bool {
        self.update(|entity| entity.commands.set(name, Some(value.into()), None))
    }

    /// Read a data metric, clearing its updated flag.
    pub fn read_data(&self, name: &str) -> Option<MetricKind> {
        self.update(|entity| entity.data.read(name))
    }

    /// Install a metric change listener across the entity's groups.
    pub fn metric_events(&self) -> mpsc::UnboundedReceiver<MetricEvent> {
        self.update(|entity| entity.events())
    }

    /// Publish a BIRTH for the entity.
    ///
    /// The payload carries every declared metric with its group prefix, the
    /// session `bdSeq` and sequence number 0. Data published afterwards
    /// continues the sequence from there.
    pub async fn publish_birth(&self) -> Result<(), PublishError> {
        if !self.state.is_online() {
            return Err(StateError::Offline.into());
        }
        self.state.start_birth();
        let bdseq = self.state.bdseq.load(Ordering::SeqCst);
        let mut payload = {
            let mut entity = self.entity.lock().unwrap();
            entity.serialize_birth()?
        };
        payload.seq = Some(0);
        payload.metrics.insert(0, bdseq_metric(bdseq));
        match publish_entity_message(&self.client, self.state.birth_topic(), payload).await {
            Ok(_) => {
                self.state.birth_completed();
                info!("Published birth. entity={}", self.state.id);
                Ok(())
            }
            Err(_) => {
                error!("Publishing birth message failed. entity={}", self.state.id);
                Err(PublishError::Client)
            }
        }
    }

    /// Publish a DATA message with the metrics updated since the last
    /// publish, or all of them when `force_all` is set.
    pub async fn publish_data(&self, force_all: bool) -> Result<(), PublishError> {
        let payload = {
            let mut entity = self.entity.lock().unwrap();
            if entity.data.is_empty() || (!force_all && !entity.data.is_updated()) {
                return Err(PublishError::NothingToSend);
            }
            /* state gate comes first so a failed attempt does not consume
             * the updated flags */
            let seq = self.state.get_next_seq()?;
            let mut payload = entity.serialize_data(force_all)?;
            payload.seq = Some(seq);
            payload
        };
        match publish_entity_message(&self.client, self.state.data_topic(), payload).await {
            Ok(_) => Ok(()),
            Err(_) => {
                error!("Publishing data message failed. entity={}", self.state.id);
                Err(PublishError::Client)
            }
        }
    }

    /// Stop all operations, sending a death certificate unless the session
    /// was built with `skip_death`, and disconnect from the broker.
    ///
    /// This will cancel [EntitySession::run()]
    pub async fn cancel(&self) {
        if !self.state.running.load(Ordering::SeqCst) {
            return;
        }
        info!("Entity session stopping. entity={}", self.state.id);
        if !self.state.skip_death {
            let payload = self.state.generate_death_payload();
            match try_publish_entity_message(&self.client, self.state.death_topic(), payload).await
            {
                Ok(_) => (),
                Err(_) => debug!("Unable to publish death certificate on exit"),
            }
        }
        _ = self.stop_tx.send(SessionShutdown).await;
        _ = self.client.disconnect().await;
    }
}

pub type OnlineCallback = std::pin::Pin<Box<dyn Fn() + Send>>;
pub type OfflineCallback = std::pin::Pin<Box<dyn Fn() + Send>>;
pub type CommandCallback = std::pin::Pin<Box<dyn Fn(Vec<CommandUpdate>) + Send>>;
pub type StateCallback = std::pin::Pin<Box<dyn Fn(&str, &StateMessage) + Send>>;

#[derive(Default)]
pub(crate) struct SessionCallbacks {
    pub on_online: Option<OnlineCallback>,
    pub on_offline: Option<OfflineCallback>,
    pub on_command: Option<CommandCallback>,
    pub on_state: Option<StateCallback>,
}

enum ClientStateMessage {
    Stopped,
    Online,
    Offline(oneshot::Sender<LastWill>),
}

enum WorkerEvent {
    Message(Message),
    State {
        host_id: String,
        message: StateMessage,
    },
}

struct Worker {
    entity: Arc<Mutex<Entity>>,
    state: Arc<SessionState>,
    client: Arc<DynClient>,
    callbacks: SessionCallbacks,
    message_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    client_state_rx: mpsc::Receiver<ClientStateMessage>,
}

impl Worker {
    async fn on_online(&mut self) {
        if self.state.online_swap(true) {
            return;
        }
        info!("Entity online. entity={}", self.state.id);
        if self.client.subscribe_many(self.state.sub_topics()).await.is_err() {
            warn!("Command subscription failed. entity={}", self.state.id);
        }
        if let Some(cb) = &self.callbacks.on_online {
            cb()
        }
    }

    fn on_offline(&mut self, will_sender: oneshot::Sender<LastWill>) {
        if !self.state.online_swap(false) {
            return;
        }
        info!("Entity offline. entity={}", self.state.id);
        self.state.set_dead();
        self.state.bdseq.fetch_add(1, Ordering::SeqCst);
        _ = will_sender.send(self.state.create_last_will());
        if let Some(cb) = &self.callbacks.on_offline {
            cb()
        }
    }

    fn on_message(&mut self, message: Message) {
        if message.kind != MessageKind::Cmd {
            debug!(
                "Ignoring non command message. entity={} kind={:?}",
                self.state.id, message.kind
            );
            return;
        }
        let updates = {
            let mut entity = self.entity.lock().unwrap();
            entity.deserialize_commands(&message.payload)
        };
        if updates.is_empty() {
            return;
        }
        if let Some(cb) = &self.callbacks.on_command {
            cb(updates)
        }
    }

    fn on_state(&self, host_id: String, message: StateMessage) {
        if let Some(cb) = &self.callbacks.on_state {
            cb(&host_id, &message)
        }
    }

    async fn run(mut self) {
        loop {
            select! {
                biased;
                maybe_state_update = self.client_state_rx.recv() => match maybe_state_update {
                    Some(state_update) => match state_update {
                        ClientStateMessage::Online => self.on_online().await,
                        ClientStateMessage::Offline(sender) => self.on_offline(sender),
                        ClientStateMessage::Stopped => break,
                    },
                    None => break, //session has been dropped
                },
                maybe_message = self.message_rx.recv() => match maybe_message {
                    Some(WorkerEvent::Message(message)) => self.on_message(message),
                    Some(WorkerEvent::State { host_id, message }) => {
                        self.on_state(host_id, message)
                    }
                    None => break, //session has been dropped
                },
            }
        }
    }
}

/// A Sparkplug entity session over one broker connection.
///
/// See [EntityBuilder] on how to create an [EntitySession] instance.
pub struct EntitySession {
    eventloop: Box<DynEventLoop>,
    stop_rx: mpsc::Receiver<SessionShutdown>,
    message_tx: mpsc::UnboundedSender<WorkerEvent>,
    client_state_tx: mpsc::Sender<ClientStateMessage>,
    state: Arc<SessionState>,
}

impl EntitySession {
    pub(crate) fn new_from_builder(
        builder: EntityBuilder,
    ) -> Result<(Self, EntityHandle), String> {
        let group_id = builder
            .group_id
            .ok_or("group id must be provided".to_string())?;
        let node_id = builder
            .node_id
            .ok_or("node id must be provided".to_string())?;
        sprig_types::utils::validate_name(&group_id)?;
        sprig_types::utils::validate_name(&node_id)?;
        if let Some(device_id) = &builder.device_id {
            sprig_types::utils::validate_name(device_id)?;
        }

        let id = match builder.device_id {
            Some(device_id) => EntityId::device(group_id, node_id, device_id),
            None => EntityId::node(group_id, node_id),
        };

        let (eventloop, client) = builder.eventloop_client;
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let (online_tx, _) = watch::channel(false);

        let state = Arc::new(SessionState {
            running: AtomicBool::new(false),
            bdseq: AtomicU8::new(0),
            inner: Mutex::new(SessionStateInner {
                seq: 0,
                online: false,
                birthed: false,
            }),
            online_tx,
            retain_birth: builder.retain_birth,
            skip_death: builder.skip_death,
            id,
        });

        let entity = Arc::new(Mutex::new(Entity::new(state.id.clone())));

        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let (client_state_tx, client_state_rx) = mpsc::channel(1);

        let worker = Worker {
            entity: entity.clone(),
            state: state.clone(),
            client: client.clone(),
            callbacks: builder.callbacks,
            message_rx,
            client_state_rx,
        };

        let session = Self {
            eventloop,
            stop_rx,
            message_tx,
            client_state_tx,
            state: state.clone(),
        };

        let handle = EntityHandle {
            state,
            entity,
            client,
            stop_tx,
        };

        tokio::spawn(async move { worker.run().await });

        Ok((session, handle))
    }

    fn update_last_will(&mut self, lastwill: LastWill) {
        self.eventloop.set_last_will(lastwill);
    }

    async fn on_online(&mut self) {
        _ = self.client_state_tx.send(ClientStateMessage::Online).await;
    }

    async fn on_offline(&mut self) {
        let (lastwill_tx, lastwill_rx) = oneshot::channel();
        _ = self
            .client_state_tx
            .send(ClientStateMessage::Offline(lastwill_tx))
            .await;
        if let Ok(will) = lastwill_rx.await {
            if !self.state.skip_death {
                self.update_last_will(will)
            }
        }
    }

    fn on_node_message(&mut self, message: NodeMessage) {
        let id = &self.state.id;
        if id.is_device() || message.group_id != id.group_id() || message.node_id != id.node_id() {
            debug!("Ignoring node message not addressed to this entity");
            return;
        }
        _ = self.message_tx.send(WorkerEvent::Message(message.message));
    }

    fn on_device_message(&mut self, message: DeviceMessage) {
        let id = &self.state.id;
        if message.group_id != id.group_id()
            || message.node_id != id.node_id()
            || Some(message.device_id.as_str()) != id.device_id()
        {
            debug!("Ignoring device message not addressed to this entity");
            return;
        }
        _ = self.message_tx.send(WorkerEvent::Message(message.message));
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Online => self.on_online().await,
            Event::Offline => self.on_offline().await,
            Event::Node(message) => self.on_node_message(message),
            Event::Device(message) => self.on_device_message(message),
            Event::State { host_id, message } => {
                _ = self.message_tx.send(WorkerEvent::State { host_id, message });
            }
            Event::InvalidPublish {
                reason,
                topic,
                payload: _,
            } => warn!(
                "Dropped an invalid publish. reason={} topic={}",
                reason,
                String::from_utf8_lossy(&topic)
            ),
        }
    }

    async fn poll_until_offline(&mut self) {
        while self.state.is_online() {
            match self.eventloop.poll().await {
                Some(Event::Offline) | None => {
                    self.on_offline().await;
                    break;
                }
                _ => (),
            }
        }
    }

    /// Run the session
    ///
    /// Runs the session until [EntityHandle::cancel()] is called
    pub async fn run(mut self) {
        info!("Entity session running. entity={}", self.state.id);
        self.state.running.store(true, Ordering::SeqCst);

        if !self.state.skip_death {
            self.update_last_will(self.state.create_last_will());
        }

        loop {
            select! {
              maybe_event = self.eventloop.poll() => match maybe_event {
                  Some(event) => self.handle_event(event).await,
                  None => break,
              },
              Some(_) = self.stop_rx.recv() => break,
            }
        }

        if timeout(Duration::from_secs(1), self.poll_until_offline())
            .await
            .is_err()
        {
            self.on_offline().await;
        }

        _ = self.client_state_tx.send(ClientStateMessage::Stopped).await;
        info!("Entity session stopped. entity={}", self.state.id);
        self.state.running.store(false, Ordering::SeqCst);
    }
}
