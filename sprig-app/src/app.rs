use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use sprig_client::{
    Client, DeviceMessage, DynClient, DynEventLoop, Event, EventLoop, LastWill, MessageKind,
    NodeMessage, StateMessage,
};
use sprig_entity::Entity;
use sprig_types::{
    payload::{Metric, Payload, StatePayload},
    topic::{
        DeviceMessage as DeviceMessageType, DeviceTopic, NodeMessage as NodeMessageType, NodeTopic,
        QoS, StateTopic, Topic, TopicFilter,
    },
    utils::{timestamp, validate_name},
    DataSetShapeError, MetricKind,
};
use thiserror::Error;
use tokio::{
    select,
    sync::mpsc,
    task,
    time::{sleep, timeout},
};

use crate::{
    config::SubscriptionConfig,
    registry::{Lifecycle, Registry},
};

const DEFAULT_GRACE_WINDOW: Duration = Duration::from_millis(500);

struct Shutdown;

/// Errors from [AppHandle] command dispatch.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Node '{0}' is not in the registry.")]
    UnknownNode(String),
    #[error("Device '{0}' is not in the registry.")]
    UnknownDevice(String),
    #[error("'{0}' is not a declared command metric.")]
    UnknownCommand(String),
    #[error("{0}")]
    Value(#[from] DataSetShapeError),
    #[error("The client did not accept the publish.")]
    Client,
}

pub type OnlineCallback = Pin<Box<dyn Fn() + Send>>;
pub type OfflineCallback = Pin<Box<dyn Fn() + Send>>;
pub type NodeDiscoveredCallback = Pin<Box<dyn Fn(&str) + Send>>;
pub type DeviceDiscoveredCallback = Pin<Box<dyn Fn(&str, &str) + Send>>;
pub type NodeLifecycleCallback = Pin<Box<dyn Fn(&str, &Payload) + Send>>;
pub type DeviceLifecycleCallback = Pin<Box<dyn Fn(&str, &str, &Payload) + Send>>;

#[derive(Default)]
struct AppCallbacks {
    online: Option<OnlineCallback>,
    offline: Option<OfflineCallback>,
    node_discovered: Option<NodeDiscoveredCallback>,
    device_discovered: Option<DeviceDiscoveredCallback>,
    nbirth: Option<NodeLifecycleCallback>,
    ndata: Option<NodeLifecycleCallback>,
    ndeath: Option<NodeLifecycleCallback>,
    dbirth: Option<DeviceLifecycleCallback>,
    ddata: Option<DeviceLifecycleCallback>,
    ddeath: Option<DeviceLifecycleCallback>,
}

struct AppState {
    host_id: String,
    published_online_state: AtomicBool,
}

fn check_known_commands(
    entity: &Entity,
    commands: &[(String, MetricKind)],
) -> Result<(), CommandError> {
    for (name, _) in commands {
        if !entity.commands.contains(name) {
            return Err(CommandError::UnknownCommand(name.clone()));
        }
    }
    Ok(())
}

fn command_payload(commands: Vec<(String, MetricKind)>) -> Result<Payload, CommandError> {
    let time = timestamp();
    let mut metrics = Vec::with_capacity(commands.len());
    for (name, value) in commands {
        let mut metric = Metric::new();
        metric
            .set_name(name)
            .set_timestamp(time)
            .set_datatype(value.datatype())
            .set_value(value.to_proto()?);
        metrics.push(metric);
    }
    Ok(Payload {
        timestamp: Some(time),
        metrics,
        seq: None,
        uuid: None,
        body: None,
    })
}

/// Handle to interact with a running [App] and its discovery registry.
#[derive(Clone)]
pub struct AppHandle {
    client: Arc<DynClient>,
    state: Arc<AppState>,
    registry: Arc<Mutex<Registry>>,
    stop_tx: mpsc::Sender<Shutdown>,
}

impl AppHandle {
    /// Stop the application, publishing the offline STATE certificate and
    /// disconnecting from the broker.
    ///
    /// This will cancel [App::run()]
    pub async fn cancel(&self) {
        info!("App stopping. host={}", self.state.host_id);
        let topic = StateTopic::new_host(&self.state.host_id);
        match self
            .client
            .try_publish_state_message(topic, StatePayload::Offline)
            .await
        {
            Ok(_) => (),
            Err(_) => debug!("Unable to publish the offline STATE certificate on exit"),
        }
        _ = self.stop_tx.send(Shutdown).await;
        _ = self.client.disconnect().await;
    }

    /// Send a single command metric to a node.
    pub async fn send_node_command(
        &self,
        node: &str,
        name: &str,
        value: MetricKind,
        force: bool,
    ) -> Result<(), CommandError> {
        self.send_node_commands(node, vec![(name.to_string(), value)], force)
            .await
    }

    /// Send a batch of command metrics to a node in one NCMD payload.
    ///
    /// Unless `force` is set, every name must be declared in the node's
    /// commands group.
    pub async fn send_node_commands(
        &self,
        node: &str,
        commands: Vec<(String, MetricKind)>,
        force: bool,
    ) -> Result<(), CommandError> {
        let topic = {
            let registry = self.registry.lock().unwrap();
            let entry = registry
                .node(node)
                .ok_or_else(|| CommandError::UnknownNode(node.to_string()))?;
            if !force {
                check_known_commands(&entry.entity, &commands)?;
            }
            NodeTopic::new(entry.entity.id().group_id(), NodeMessageType::NCmd, node)
        };
        let payload = command_payload(commands)?;
        self.client
            .publish_node_message(topic, payload)
            .await
            .map_err(|_| CommandError::Client)
    }

    /// Send a single command metric to a device.
    pub async fn send_device_command(
        &self,
        node: &str,
        device: &str,
        name: &str,
        value: MetricKind,
        force: bool,
    ) -> Result<(), CommandError> {
        self.send_device_commands(node, device, vec![(name.to_string(), value)], force)
            .await
    }

    /// Send a batch of command metrics to a device in one DCMD payload.
    pub async fn send_device_commands(
        &self,
        node: &str,
        device: &str,
        commands: Vec<(String, MetricKind)>,
        force: bool,
    ) -> Result<(), CommandError> {
        let topic = {
            let registry = self.registry.lock().unwrap();
            if registry.node(node).is_none() {
                return Err(CommandError::UnknownNode(node.to_string()));
            }
            let entry = registry
                .device(node, device)
                .ok_or_else(|| CommandError::UnknownDevice(device.to_string()))?;
            if !force {
                check_known_commands(&entry.entity, &commands)?;
            }
            DeviceTopic::new(
                entry.entity.id().group_id(),
                DeviceMessageType::DCmd,
                node,
                device,
            )
        };
        let payload = command_payload(commands)?;
        self.client
            .publish_device_message(topic, payload)
            .await
            .map_err(|_| CommandError::Client)
    }

    /// Names of every edge node the registry has discovered.
    pub fn node_names(&self) -> Vec<String> {
        self.registry.lock().unwrap().node_names()
    }

    /// Names of the devices discovered under a node.
    pub fn device_names(&self, node: &str) -> Option<Vec<String>> {
        let registry = self.registry.lock().unwrap();
        registry
            .node(node)
            .map(|entry| entry.devices.keys().cloned().collect())
    }

    pub fn node_alive(&self, node: &str) -> Option<bool> {
        self.registry
            .lock()
            .unwrap()
            .node(node)
            .map(|entry| entry.alive)
    }

    pub fn device_alive(&self, node: &str, device: &str) -> Option<bool> {
        self.registry
            .lock()
            .unwrap()
            .device(node, device)
            .map(|entry| entry.alive)
    }

    /// Run a closure against a node's entity, if it is registered.
    pub fn with_node<F, R>(&self, node: &str, f: F) -> Option<R>
    where
        F: FnOnce(&Entity) -> R,
    {
        let registry = self.registry.lock().unwrap();
        registry.node(node).map(|entry| f(&entry.entity))
    }

    /// Run a closure against a device's entity, if it is registered.
    pub fn with_device<F, R>(&self, node: &str, device: &str, f: F) -> Option<R>
    where
        F: FnOnce(&Entity) -> R,
    {
        let registry = self.registry.lock().unwrap();
        registry.device(node, device).map(|entry| f(&entry.entity))
    }

    /// Drop a node and all of its devices from the registry.
    pub fn remove_node(&self, node: &str) -> bool {
        self.registry.lock().unwrap().remove_node(node)
    }

    /// Drop a single device from the registry.
    pub fn remove_device(&self, node: &str, device: &str) -> bool {
        self.registry.lock().unwrap().remove_device(node, device)
    }
}

/// A Sparkplug host application.
///
/// Consumes the namespace it is subscribed to, maintaining a registry of the
/// edge nodes and devices seen there, and publishes the host's own STATE
/// certificates.
pub struct App {
    online: bool,
    state: Arc<AppState>,
    subscription_config: SubscriptionConfig,
    client: Arc<DynClient>,
    eventloop: Box<DynEventLoop>,
    stop_rx: mpsc::Receiver<Shutdown>,
    registry: Arc<Mutex<Registry>>,
    grace: Duration,
    callbacks: AppCallbacks,
}

impl App {
    /// Creates a new instance along with an associated handle.
    pub fn new<S, E, C>(
        host_id: S,
        subscription_config: SubscriptionConfig,
        eventloop: E,
        client: C,
    ) -> Result<(Self, AppHandle), String>
    where
        S: Into<String>,
        E: EventLoop + Send + 'static,
        C: Client + Send + Sync + 'static,
    {
        let host_id: String = host_id.into();
        validate_name(&host_id).map_err(|e| format!("Invalid host id: {e}"))?;

        let (stop_tx, stop_rx) = mpsc::channel(1);
        let state = Arc::new(AppState {
            host_id: host_id.clone(),
            published_online_state: AtomicBool::new(false),
        });
        let registry = Arc::new(Mutex::new(Registry::new(host_id, DEFAULT_GRACE_WINDOW)));
        let client: Arc<DynClient> = Arc::new(client);

        let app = Self {
            online: false,
            state: state.clone(),
            subscription_config,
            client: client.clone(),
            eventloop: Box::new(eventloop),
            stop_rx,
            registry: registry.clone(),
            grace: DEFAULT_GRACE_WINDOW,
            callbacks: AppCallbacks::default(),
        };
        let handle = AppHandle {
            client,
            state,
            registry,
            stop_tx,
        };
        Ok((app, handle))
    }

    /// Override the post-connect discovery grace window. Defaults to 500 ms.
    pub fn with_grace_window(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self.registry.lock().unwrap().set_grace(grace);
        self
    }

    /// Register a callback for when the application goes online.
    ///
    /// *Note*: This callback is blocking and is called directly from the run
    /// loop. Blocking will prevent progression.
    pub fn on_online<F>(mut self, cb: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        self.callbacks.online = Some(Box::pin(cb));
        self
    }

    /// Register a callback for when the application goes offline.
    pub fn on_offline<F>(mut self, cb: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        self.callbacks.offline = Some(Box::pin(cb));
        self
    }

    /// Register a callback for when an unseen edge node is first registered.
    ///
    /// This fires on discovery, which is any message from the node, not only
    /// its BIRTH.
    pub fn on_node_discovered<F>(mut self, cb: F) -> Self
    where
        F: Fn(&str) + Send + 'static,
    {
        self.callbacks.node_discovered = Some(Box::pin(cb));
        self
    }

    /// Register a callback for when an unseen device is first registered.
    pub fn on_device_discovered<F>(mut self, cb: F) -> Self
    where
        F: Fn(&str, &str) + Send + 'static,
    {
        self.callbacks.device_discovered = Some(Box::pin(cb));
        self
    }

    /// Register a callback for node BIRTH messages.
    pub fn on_nbirth<F>(mut self, cb: F) -> Self
    where
        F: Fn(&str, &Payload) + Send + 'static,
    {
        self.callbacks.nbirth = Some(Box::pin(cb));
        self
    }

    /// Register a callback for node DATA messages.
    pub fn on_ndata<F>(mut self, cb: F) -> Self
    where
        F: Fn(&str, &Payload) + Send + 'static,
    {
        self.callbacks.ndata = Some(Box::pin(cb));
        self
    }

    /// Register a callback for node DEATH messages.
    pub fn on_ndeath<F>(mut self, cb: F) -> Self
    where
        F: Fn(&str, &Payload) + Send + 'static,
    {
        self.callbacks.ndeath = Some(Box::pin(cb));
        self
    }

    /// Register a callback for device BIRTH messages.
    pub fn on_dbirth<F>(mut self, cb: F) -> Self
    where
        F: Fn(&str, &str, &Payload) + Send + 'static,
    {
        self.callbacks.dbirth = Some(Box::pin(cb));
        self
    }

    /// Register a callback for device DATA messages.
    pub fn on_ddata<F>(mut self, cb: F) -> Self
    where
        F: Fn(&str, &str, &Payload) + Send + 'static,
    {
        self.callbacks.ddata = Some(Box::pin(cb));
        self
    }

    /// Register a callback for device DEATH messages.
    pub fn on_ddeath<F>(mut self, cb: F) -> Self
    where
        F: Fn(&str, &str, &Payload) + Send + 'static,
    {
        self.callbacks.ddeath = Some(Box::pin(cb));
        self
    }

    fn update_last_will(&mut self) {
        self.eventloop
            .set_last_will(LastWill::new_app(&self.state.host_id));
    }

    fn handle_online(&mut self) {
        if self.online {
            return;
        }
        info!("App online. host={}", self.state.host_id);
        self.online = true;

        self.registry.lock().unwrap().online(Instant::now());
        let registry = self.registry.clone();
        let grace = self.grace;
        task::spawn(async move {
            sleep(grace).await;
            registry.lock().unwrap().apply_grace(Instant::now());
        });

        let client = self.client.clone();
        let state_topic = StateTopic::new_host(&self.state.host_id);
        let mut topics: Vec<TopicFilter> = self.subscription_config.clone().into();
        if let SubscriptionConfig::AllGroups = self.subscription_config {
            //the namespace wildcard already covers every STATE topic
        } else {
            topics.push(TopicFilter::new_with_qos(
                Topic::State(state_topic.clone()),
                QoS::AtMostOnce,
            ));
        }
        let state = self.state.clone();
        task::spawn(async move {
            _ = client.subscribe_many(topics).await;
            _ = client
                .publish_state_message(state_topic, StatePayload::Online)
                .await;
            state.published_online_state.store(true, Ordering::SeqCst);
        });

        if let Some(cb) = &self.callbacks.online {
            cb()
        }
    }

    fn handle_offline(&mut self) {
        if !self.online {
            return;
        }
        info!("App offline. host={}", self.state.host_id);
        self.online = false;
        self.state
            .published_online_state
            .store(false, Ordering::SeqCst);
        self.update_last_will();
        if let Some(cb) = &self.callbacks.offline {
            cb()
        }
    }

    fn handle_node_message(&mut self, message: NodeMessage) {
        let NodeMessage {
            group_id,
            node_id,
            message,
        } = message;
        let lifecycle = match message.kind {
            MessageKind::Birth => Lifecycle::Birth,
            MessageKind::Data => Lifecycle::Data,
            MessageKind::Death => Lifecycle::Death,
            MessageKind::Cmd => {
                debug!("Ignoring a command addressed to another entity. node={node_id}");
                return;
            }
        };
        let payload = message.payload;
        let outcome = self.registry.lock().unwrap().ingest_node(
            &group_id,
            &node_id,
            lifecycle,
            &payload,
            Instant::now(),
        );
        let outcome = match outcome {
            Some(outcome) => outcome,
            None => return,
        };
        if outcome.new_node {
            if let Some(cb) = &self.callbacks.node_discovered {
                cb(&node_id)
            }
        }
        let cb = match lifecycle {
            Lifecycle::Birth => &self.callbacks.nbirth,
            Lifecycle::Data => &self.callbacks.ndata,
            Lifecycle::Death => &self.callbacks.ndeath,
        };
        if let Some(cb) = cb {
            cb(&node_id, &payload)
        }
    }

    fn handle_device_message(&mut self, message: DeviceMessage) {
        let DeviceMessage {
            group_id,
            node_id,
            device_id,
            message,
        } = message;
        let lifecycle = match message.kind {
            MessageKind::Birth => Lifecycle::Birth,
            MessageKind::Data => Lifecycle::Data,
            MessageKind::Death => Lifecycle::Death,
            MessageKind::Cmd => {
                debug!("Ignoring a command addressed to another entity. device={device_id}");
                return;
            }
        };
        let payload = message.payload;
        let outcome = self.registry.lock().unwrap().ingest_device(
            &group_id,
            &node_id,
            &device_id,
            lifecycle,
            &payload,
            Instant::now(),
        );
        let outcome = match outcome {
            Some(outcome) => outcome,
            None => return,
        };
        if outcome.new_node {
            if let Some(cb) = &self.callbacks.node_discovered {
                cb(&node_id)
            }
        }
        if outcome.new_device {
            if let Some(cb) = &self.callbacks.device_discovered {
                cb(&node_id, &device_id)
            }
        }
        let cb = match lifecycle {
            Lifecycle::Birth => &self.callbacks.dbirth,
            Lifecycle::Data => &self.callbacks.ddata,
            Lifecycle::Death => &self.callbacks.ddeath,
        };
        if let Some(cb) = cb {
            cb(&node_id, &device_id, &payload)
        }
    }

    fn handle_state(&mut self, host_id: String, message: StateMessage) {
        if host_id != self.state.host_id {
            return;
        }
        if !self.state.published_online_state.load(Ordering::SeqCst) {
            return;
        }
        if let Some(StatePayload::Offline) = message.certificate() {
            warn!(
                "Another party published our STATE as offline. Republishing. host={}",
                self.state.host_id
            );
            let client = self.client.clone();
            let topic = StateTopic::new_host(&self.state.host_id);
            task::spawn(async move {
                _ = client
                    .publish_state_message(topic, StatePayload::Online)
                    .await;
            });
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Online => self.handle_online(),
            Event::Offline => self.handle_offline(),
            Event::Node(message) => self.handle_node_message(message),
            Event::Device(message) => self.handle_device_message(message),
            Event::State { host_id, message } => self.handle_state(host_id, message),
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
        while self.online {
            match self.eventloop.poll().await {
                Some(Event::Offline) | None => {
                    self.handle_offline();
                    break;
                }
                _ => (),
            }
        }
    }

    /// Run the application
    ///
    /// Runs until [AppHandle::cancel()] is called
    pub async fn run(mut self) {
        info!("App running. host={}", self.state.host_id);
        self.update_last_will();
        loop {
            select! {
                maybe_event = self.eventloop.poll() => match maybe_event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                Some(_) = self.stop_rx.recv() => break,
            }
        }
        if timeout(Duration::from_secs(1), self.poll_until_offline())
            .await
            .is_err()
        {
            self.handle_offline();
        }
        info!("App stopped. host={}", self.state.host_id);
    }
}
