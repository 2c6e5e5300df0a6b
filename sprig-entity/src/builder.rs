use std::sync::Arc;

use sprig_client::{Client, DynClient, DynEventLoop, EventLoop, StateMessage};

use crate::{entity::CommandUpdate, session::SessionCallbacks, EntityHandle, EntitySession};

/// A builder for creating and configuring entity sessions.
///
/// A session without a device id acts as an edge node, with one it acts as a
/// device with its own broker connection.
pub struct EntityBuilder {
    pub(crate) group_id: Option<String>,
    pub(crate) node_id: Option<String>,
    pub(crate) device_id: Option<String>,
    pub(crate) retain_birth: bool,
    pub(crate) skip_death: bool,
    pub(crate) eventloop_client: (Box<DynEventLoop>, Arc<DynClient>),
    pub(crate) callbacks: SessionCallbacks,
}

impl EntityBuilder {
    /// Creates a new builder with the specified event loop and client.
    pub fn new<E: EventLoop + Send + 'static, C: Client + Send + Sync + 'static>(
        eventloop: E,
        client: C,
    ) -> Self {
        Self {
            group_id: None,
            node_id: None,
            device_id: None,
            retain_birth: false,
            skip_death: false,
            eventloop_client: (Box::new(eventloop), Arc::new(client)),
            callbacks: SessionCallbacks::default(),
        }
    }

    /// Sets the group ID the entity belongs to.
    pub fn with_group_id<S: Into<String>>(mut self, group_id: S) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Sets the edge node ID, the entity's own ID for a node session and the
    /// parent node for a device session.
    pub fn with_node_id<S: Into<String>>(mut self, node_id: S) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Make this a device session with the given device ID.
    pub fn with_device_id<S: Into<String>>(mut self, device_id: S) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Publish births as retained messages. Off by default, retained births
    /// let late subscribers discover the entity without waiting for the next
    /// session.
    pub fn with_retain_birth(mut self, retain: bool) -> Self {
        self.retain_birth = retain;
        self
    }

    /// Do not register a death will and skip the death certificate on
    /// [cancel](crate::EntityHandle::cancel). Off by default.
    pub fn with_skip_death(mut self, skip: bool) -> Self {
        self.skip_death = skip;
        self
    }

    /// Callback invoked with the commands that survived filtering whenever a
    /// CMD message arrives.
    pub fn on_command<F>(mut self, cb: F) -> Self
    where
        F: Fn(Vec<CommandUpdate>) + Send + Sync + 'static,
    {
        self.callbacks.on_command = Some(Box::pin(cb));
        self
    }

    /// Callback invoked when the session comes online.
    pub fn on_online<F>(mut self, cb: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks.on_online = Some(Box::pin(cb));
        self
    }

    /// Callback invoked when the session goes offline.
    pub fn on_offline<F>(mut self, cb: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks.on_offline = Some(Box::pin(cb));
        self
    }

    /// Callback invoked for every STATE message from a host application.
    pub fn on_state<F>(mut self, cb: F) -> Self
    where
        F: Fn(&str, &StateMessage) + Send + Sync + 'static,
    {
        self.callbacks.on_state = Some(Box::pin(cb));
        self
    }

    /// Builds the session with the configured settings.
    ///
    /// Returns an error if a required ID is missing or any ID is not a valid
    /// topic name segment.
    pub fn build(self) -> Result<(EntitySession, EntityHandle), String> {
        EntitySession::new_from_builder(self)
    }
}
