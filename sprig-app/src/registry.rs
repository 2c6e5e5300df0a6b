use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use log::{debug, info};
use sprig_entity::Entity;
use sprig_types::payload::Payload;

/// Lifecycle verbs the registry reacts to. CMD traffic never reaches it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Lifecycle {
    Birth,
    Data,
    Death,
}

pub(crate) struct DeviceEntity {
    pub(crate) entity: Entity,
    pub(crate) alive: bool,
}

impl DeviceEntity {
    fn new(entity: Entity) -> Self {
        Self {
            entity,
            alive: false,
        }
    }
}

pub(crate) struct EdgeEntity {
    pub(crate) entity: Entity,
    pub(crate) alive: bool,
    pub(crate) devices: HashMap<String, DeviceEntity>,
}

impl EdgeEntity {
    fn new(entity: Entity) -> Self {
        Self {
            entity,
            alive: false,
            devices: HashMap::new(),
        }
    }
}

pub(crate) struct NodeIngest {
    pub(crate) new_node: bool,
}

pub(crate) struct DeviceIngest {
    pub(crate) new_node: bool,
    pub(crate) new_device: bool,
}

/// Tree of peers discovered from inbound traffic.
///
/// Nodes are keyed by name. Alive transitions are suppressed while the
/// post-connect grace window is open so a broker's retained backlog does not
/// register as a burst of live births.
pub(crate) struct Registry {
    host_id: String,
    grace: Duration,
    grace_until: Option<Instant>,
    nodes: HashMap<String, EdgeEntity>,
}

impl Registry {
    pub(crate) fn new(host_id: String, grace: Duration) -> Self {
        Self {
            host_id,
            grace,
            grace_until: None,
            nodes: HashMap::new(),
        }
    }

    pub(crate) fn set_grace(&mut self, grace: Duration) {
        self.grace = grace;
    }

    /// Start the grace window. Called on every connect, so a reconnect
    /// restarts it.
    pub(crate) fn online(&mut self, now: Instant) {
        self.grace_until = Some(now + self.grace);
    }

    /// Returns whether alive transitions currently apply. The first call after
    /// the window elapses resets every alive flag to false as the baseline the
    /// live transitions then build on.
    pub(crate) fn apply_grace(&mut self, now: Instant) -> bool {
        let until = match self.grace_until {
            Some(until) => until,
            None => return true,
        };
        if now < until {
            return false;
        }
        debug!("Discovery grace window elapsed. Resetting alive baselines.");
        for node in self.nodes.values_mut() {
            node.alive = false;
            for device in node.devices.values_mut() {
                device.alive = false;
            }
        }
        self.grace_until = None;
        true
    }

    pub(crate) fn ingest_node(
        &mut self,
        group_id: &str,
        node_id: &str,
        lifecycle: Lifecycle,
        payload: &Payload,
        now: Instant,
    ) -> Option<NodeIngest> {
        if node_id == self.host_id {
            debug!("Ignoring a message published under our own name. node={node_id}");
            return None;
        }
        let live = self.apply_grace(now);
        let new_node = !self.nodes.contains_key(node_id);
        let node = self.nodes.entry(node_id.to_string()).or_insert_with(|| {
            info!("Discovered edge node. group={group_id} node={node_id}");
            EdgeEntity::new(Entity::new_node(group_id, node_id))
        });
        match lifecycle {
            Lifecycle::Birth => {
                node.entity.deserialize_birth(payload);
                if live {
                    node.alive = true;
                }
            }
            Lifecycle::Data => {
                node.entity.deserialize_data(payload);
                if live {
                    node.alive = true;
                }
            }
            Lifecycle::Death => {
                if live {
                    node.alive = false;
                }
            }
        }
        Some(NodeIngest { new_node })
    }

    pub(crate) fn ingest_device(
        &mut self,
        group_id: &str,
        node_id: &str,
        device_id: &str,
        lifecycle: Lifecycle,
        payload: &Payload,
        now: Instant,
    ) -> Option<DeviceIngest> {
        if node_id == self.host_id {
            debug!("Ignoring a message published under our own name. node={node_id}");
            return None;
        }
        let live = self.apply_grace(now);
        let new_node = !self.nodes.contains_key(node_id);
        let node = self.nodes.entry(node_id.to_string()).or_insert_with(|| {
            info!("Discovered edge node. group={group_id} node={node_id}");
            EdgeEntity::new(Entity::new_node(group_id, node_id))
        });
        let new_device = !node.devices.contains_key(device_id);
        let device = node.devices.entry(device_id.to_string()).or_insert_with(|| {
            info!("Discovered device. group={group_id} node={node_id} device={device_id}");
            DeviceEntity::new(Entity::new_device(group_id, node_id, device_id))
        });
        match lifecycle {
            Lifecycle::Birth => {
                device.entity.deserialize_birth(payload);
                if live {
                    device.alive = true;
                }
            }
            Lifecycle::Data => {
                device.entity.deserialize_data(payload);
                if live {
                    device.alive = true;
                }
            }
            Lifecycle::Death => {
                if live {
                    device.alive = false;
                }
            }
        }
        Some(DeviceIngest {
            new_node,
            new_device,
        })
    }

    pub(crate) fn node(&self, node_id: &str) -> Option<&EdgeEntity> {
        self.nodes.get(node_id)
    }

    pub(crate) fn device(&self, node_id: &str, device_id: &str) -> Option<&DeviceEntity> {
        self.nodes.get(node_id)?.devices.get(device_id)
    }

    pub(crate) fn node_names(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    pub(crate) fn remove_node(&mut self, node_id: &str) -> bool {
        self.nodes.remove(node_id).is_some()
    }

    pub(crate) fn remove_device(&mut self, node_id: &str, device_id: &str) -> bool {
        match self.nodes.get_mut(node_id) {
            Some(node) => node.devices.remove(device_id).is_some(),
            None => false,
        }
    }
}
