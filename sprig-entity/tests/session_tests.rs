use std::time::Duration;

use sprig_client::{
    channel::{ChannelBroker, ChannelEventLoop, OutboundMessage},
    Event, Message, MessageKind, NodeMessage, StateMessage,
};
use sprig_entity::{EntityBuilder, EntityHandle, EntitySession};
use sprig_types::{
    constants::BDSEQ,
    payload::{metric, DataType, Message as _, Metric, Payload, StatePayload},
    topic::{
        DeviceMessage as DeviceMessageType, DeviceTopic, NodeMessage as NodeMessageType, NodeTopic,
        QoS, StateTopic, Topic, TopicFilter,
    },
    MetricKind,
};
use tokio::time::timeout;

const GROUP_ID: &str = "factory";
const NODE_ID: &str = "press";
const DEVICE_ID: &str = "sensor-1";

fn node_session(builder: EntityBuilder) -> (EntitySession, EntityHandle) {
    builder
        .with_group_id(GROUP_ID)
        .with_node_id(NODE_ID)
        .build()
        .unwrap()
}

async fn recv_outbound(broker: &mut ChannelBroker) -> OutboundMessage {
    timeout(Duration::from_secs(1), broker.rx_outbound.recv())
        .await
        .unwrap()
        .unwrap()
}

/// Drive the session online and return the subscription filters it requested.
async fn establish_online(broker: &mut ChannelBroker) -> Vec<TopicFilter> {
    broker.tx_event.send(Event::Online).unwrap();
    match recv_outbound(broker).await {
        OutboundMessage::Subscribe(filters) => filters,
        message => panic!("got {message:?}"),
    }
}

fn expected_death_payload(expected_bdseq: u64) -> Payload {
    let mut metric = Metric::new();
    metric
        .set_name(BDSEQ.to_string())
        .set_datatype(DataType::Int64)
        .set_value(metric::Value::LongValue(expected_bdseq));
    Payload {
        timestamp: None,
        metrics: vec![metric],
        seq: None,
        uuid: None,
        body: None,
    }
}

fn verify_birth_payload(payload: &Payload, expected_bdseq: u64) {
    assert_eq!(payload.seq, Some(0));
    assert_ne!(payload.timestamp, None);

    let mut contains_bdseq = false;
    for metric in &payload.metrics {
        assert_ne!(metric.datatype, None);
        let metric_name = match &metric.name {
            Some(name) => name,
            None => panic!("Metric name is required in birth payload"),
        };
        if metric.value.is_some() {
            assert_eq!(metric.is_null, None)
        }
        if metric_name.eq(BDSEQ) {
            contains_bdseq = true;
            assert_eq!(metric.alias, None);
            assert_eq!(metric.datatype, Some(DataType::Int64 as u32));
            assert_eq!(metric.value, Some(metric::Value::LongValue(expected_bdseq)));
        }
    }
    assert!(contains_bdseq);
}

fn birth_metric_names(payload: &Payload) -> Vec<String> {
    payload
        .metrics
        .iter()
        .filter_map(|m| m.name.clone())
        .collect()
}

fn cmd_message(metrics: Vec<Metric>) -> NodeMessage {
    NodeMessage {
        group_id: GROUP_ID.to_string(),
        node_id: NODE_ID.to_string(),
        message: Message {
            kind: MessageKind::Cmd,
            payload: Payload {
                timestamp: Some(0),
                metrics,
                seq: None,
                uuid: None,
                body: None,
            },
        },
    }
}

fn cmd_metric(name: &str, datatype: DataType, value: metric::Value) -> Metric {
    let mut metric = Metric::new();
    metric
        .set_name(name.to_string())
        .set_datatype(datatype)
        .set_value(value);
    metric
}

#[tokio::test]
async fn node_session_establishment() {
    let (eventloop, client, mut broker) = ChannelEventLoop::new();
    let (session, handle) = node_session(EntityBuilder::new(eventloop, client));
    tokio::spawn(async move { session.run().await });

    handle.set_attribute("version", "1.0");
    handle.set_data("temp", 20.0);
    handle.set_command("reboot", false);

    assert!(!handle.connected());
    let filters = establish_online(&mut broker).await;
    assert!(handle.wait_online(Duration::from_secs(1)).await);

    let expected_filters = vec![
        TopicFilter::new_with_qos(
            Topic::NodeTopic(NodeTopic::new(GROUP_ID, NodeMessageType::NCmd, NODE_ID)),
            QoS::AtLeastOnce,
        ),
        TopicFilter::new_with_qos(Topic::State(StateTopic::new()), QoS::AtLeastOnce),
    ];
    assert_eq!(filters, expected_filters);

    /* the will must describe the session about to be born */
    let last_will = broker.last_will().unwrap();
    let death_topic = NodeTopic::new(GROUP_ID, NodeMessageType::NDeath, NODE_ID);
    assert_eq!(last_will.topic, death_topic.topic);
    assert!(!last_will.retain);
    let will_payload = Payload::decode(last_will.payload.as_slice()).unwrap();
    assert_eq!(will_payload, expected_death_payload(0));

    handle.publish_birth().await.unwrap();
    let (topic, payload) = match recv_outbound(&mut broker).await {
        OutboundMessage::NodeMessage { topic, payload } => (topic, payload),
        message => panic!("got {message:?}"),
    };
    assert_eq!(topic, NodeTopic::new(GROUP_ID, NodeMessageType::NBirth, NODE_ID));
    assert_eq!(topic.get_publish_quality_retain(), (QoS::AtMostOnce, false));
    verify_birth_payload(&payload, 0);
    assert_eq!(
        birth_metric_names(&payload),
        vec!["bdSeq", "ATTR/version", "DATA/temp", "CMD/reboot"]
    );

    handle.set_data("temp", 21.0);
    handle.publish_data(false).await.unwrap();
    let (topic, payload) = match recv_outbound(&mut broker).await {
        OutboundMessage::NodeMessage { topic, payload } => (topic, payload),
        message => panic!("got {message:?}"),
    };
    assert_eq!(topic, NodeTopic::new(GROUP_ID, NodeMessageType::NData, NODE_ID));
    assert_eq!(payload.seq, Some(1));
    assert_eq!(birth_metric_names(&payload), vec!["temp"]);
}

#[tokio::test]
async fn device_session_establishment() {
    let (eventloop, client, mut broker) = ChannelEventLoop::new();
    let (session, handle) = EntityBuilder::new(eventloop, client)
        .with_group_id(GROUP_ID)
        .with_node_id(NODE_ID)
        .with_device_id(DEVICE_ID)
        .build()
        .unwrap();
    tokio::spawn(async move { session.run().await });

    handle.set_data("humidity", 40.0);

    let filters = establish_online(&mut broker).await;
    let expected_filters = vec![
        TopicFilter::new_with_qos(
            Topic::DeviceTopic(DeviceTopic::new(
                GROUP_ID,
                DeviceMessageType::DCmd,
                NODE_ID,
                DEVICE_ID,
            )),
            QoS::AtLeastOnce,
        ),
        TopicFilter::new_with_qos(Topic::State(StateTopic::new()), QoS::AtLeastOnce),
    ];
    assert_eq!(filters, expected_filters);

    let last_will = broker.last_will().unwrap();
    let death_topic = DeviceTopic::new(GROUP_ID, DeviceMessageType::DDeath, NODE_ID, DEVICE_ID);
    assert_eq!(last_will.topic, death_topic.topic);

    handle.publish_birth().await.unwrap();
    let (topic, payload) = match recv_outbound(&mut broker).await {
        OutboundMessage::DeviceMessage { topic, payload } => (topic, payload),
        message => panic!("got {message:?}"),
    };
    assert_eq!(topic, DeviceTopic::new(GROUP_ID, DeviceMessageType::DBirth, NODE_ID, DEVICE_ID));
    verify_birth_payload(&payload, 0);

    handle.set_data("humidity", 41.5);
    handle.publish_data(false).await.unwrap();
    let (topic, payload) = match recv_outbound(&mut broker).await {
        OutboundMessage::DeviceMessage { topic, payload } => (topic, payload),
        message => panic!("got {message:?}"),
    };
    assert_eq!(topic, DeviceTopic::new(GROUP_ID, DeviceMessageType::DData, NODE_ID, DEVICE_ID));
    assert_eq!(payload.seq, Some(1));
}

#[tokio::test]
async fn bdseq_increments_across_reconnects() {
    let (eventloop, client, mut broker) = ChannelEventLoop::new();
    let (session, handle) = node_session(EntityBuilder::new(eventloop, client));
    tokio::spawn(async move { session.run().await });

    handle.set_data("temp", 20.0);

    establish_online(&mut broker).await;
    handle.publish_birth().await.unwrap();
    match recv_outbound(&mut broker).await {
        OutboundMessage::NodeMessage { payload, .. } => verify_birth_payload(&payload, 0),
        message => panic!("got {message:?}"),
    }

    broker.tx_event.send(Event::Offline).unwrap();

    /* the refreshed will must carry the next session's bdSeq */
    let deadline = std::time::Instant::now() + Duration::from_secs(1);
    loop {
        let will = broker.last_will().unwrap();
        let will_payload = Payload::decode(will.payload.as_slice()).unwrap();
        if will_payload == expected_death_payload(1) {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "will was not refreshed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    establish_online(&mut broker).await;
    handle.publish_birth().await.unwrap();
    match recv_outbound(&mut broker).await {
        OutboundMessage::NodeMessage { payload, .. } => verify_birth_payload(&payload, 1),
        message => panic!("got {message:?}"),
    }
}

#[tokio::test]
async fn data_requires_an_online_birthed_session() {
    let (eventloop, client, mut broker) = ChannelEventLoop::new();
    let (session, handle) = node_session(EntityBuilder::new(eventloop, client));
    tokio::spawn(async move { session.run().await });

    handle.set_data("temp", 20.0);
    assert!(matches!(
        handle.publish_data(false).await,
        Err(sprig_entity::PublishError::State(
            sprig_entity::StateError::Offline
        ))
    ));

    establish_online(&mut broker).await;
    assert!(handle.wait_online(Duration::from_secs(1)).await);
    assert!(matches!(
        handle.publish_data(false).await,
        Err(sprig_entity::PublishError::State(
            sprig_entity::StateError::UnBirthed
        ))
    ));

    handle.publish_birth().await.unwrap();
    recv_outbound(&mut broker).await;
    assert!(matches!(
        handle.publish_data(false).await,
        Err(sprig_entity::PublishError::NothingToSend)
    ));
}

#[tokio::test]
async fn seq_wraps_modulo_256() {
    let (eventloop, client, mut broker) = ChannelEventLoop::new();
    let (session, handle) = node_session(EntityBuilder::new(eventloop, client));
    tokio::spawn(async move { session.run().await });

    handle.set_data("counter", 0i64);
    establish_online(&mut broker).await;
    handle.publish_birth().await.unwrap();
    recv_outbound(&mut broker).await;

    for i in 1u64..=260 {
        handle.set_data("counter", i as i64);
        handle.publish_data(false).await.unwrap();
        match recv_outbound(&mut broker).await {
            OutboundMessage::NodeMessage { payload, .. } => {
                assert_eq!(payload.seq, Some(i % 256), "at publish {i}")
            }
            message => panic!("got {message:?}"),
        }
    }
}

#[tokio::test]
async fn graceful_shutdown_publishes_death_then_disconnects() {
    let (eventloop, client, mut broker) = ChannelEventLoop::new();
    let (session, handle) = node_session(EntityBuilder::new(eventloop, client));
    let run = tokio::spawn(async move { session.run().await });

    handle.set_data("temp", 20.0);
    establish_online(&mut broker).await;
    handle.publish_birth().await.unwrap();
    recv_outbound(&mut broker).await;

    handle.cancel().await;

    let (topic, payload) = match recv_outbound(&mut broker).await {
        OutboundMessage::NodeMessage { topic, payload } => (topic, payload),
        message => panic!("got {message:?}"),
    };
    assert_eq!(topic, NodeTopic::new(GROUP_ID, NodeMessageType::NDeath, NODE_ID));
    assert_eq!(payload, expected_death_payload(0));

    assert_eq!(recv_outbound(&mut broker).await, OutboundMessage::Disconnect);

    /* a real broker follows a disconnect with an offline event */
    broker.tx_event.send(Event::Offline).unwrap();
    timeout(Duration::from_secs(2), run).await.unwrap().unwrap();
}

#[tokio::test]
async fn skip_death_suppresses_will_and_death_certificate() {
    let (eventloop, client, mut broker) = ChannelEventLoop::new();
    let (session, handle) =
        node_session(EntityBuilder::new(eventloop, client).with_skip_death(true));
    tokio::spawn(async move { session.run().await });

    handle.set_data("temp", 20.0);
    establish_online(&mut broker).await;
    assert!(broker.last_will().is_none());

    handle.publish_birth().await.unwrap();
    recv_outbound(&mut broker).await;

    handle.cancel().await;
    assert_eq!(recv_outbound(&mut broker).await, OutboundMessage::Disconnect);
}

#[tokio::test]
async fn retained_birth_when_configured() {
    let (eventloop, client, mut broker) = ChannelEventLoop::new();
    let (session, handle) =
        node_session(EntityBuilder::new(eventloop, client).with_retain_birth(true));
    tokio::spawn(async move { session.run().await });

    handle.set_data("temp", 20.0);
    establish_online(&mut broker).await;
    handle.publish_birth().await.unwrap();

    match recv_outbound(&mut broker).await {
        OutboundMessage::NodeMessage { topic, .. } => {
            assert_eq!(topic.get_publish_quality_retain(), (QoS::AtMostOnce, true))
        }
        message => panic!("got {message:?}"),
    }
}

#[tokio::test]
async fn commands_are_filtered_and_batched_to_the_callback() {
    let (cmd_tx, mut cmd_rx) = tokio::sync::mpsc::unbounded_channel();
    let (eventloop, client, mut broker) = ChannelEventLoop::new();
    let (session, handle) = node_session(EntityBuilder::new(eventloop, client).on_command(
        move |updates| {
            cmd_tx.send(updates).unwrap();
        },
    ));
    tokio::spawn(async move { session.run().await });

    handle.set_command("reboot", false);
    handle.set_command("setpoint", 10.0);
    establish_online(&mut broker).await;
    handle.publish_birth().await.unwrap();
    recv_outbound(&mut broker).await;

    broker
        .tx_event
        .send(Event::Node(cmd_message(vec![
            cmd_metric("unknown", DataType::Boolean, metric::Value::BooleanValue(true)),
            cmd_metric("reboot", DataType::Int64, metric::Value::LongValue(1)),
            cmd_metric("setpoint", DataType::Double, metric::Value::DoubleValue(12.5)),
        ])))
        .unwrap();

    let updates = timeout(Duration::from_secs(1), cmd_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].name, "setpoint");
    assert_eq!(updates[0].value, MetricKind::Double(12.5));

    assert_eq!(
        handle.update(|entity| entity.commands.peek("setpoint").cloned()),
        Some(MetricKind::Double(12.5))
    );
    assert_eq!(
        handle.update(|entity| entity.commands.peek("reboot").cloned()),
        Some(MetricKind::Bool(false))
    );

    /* a batch where nothing survives must not reach the callback */
    broker
        .tx_event
        .send(Event::Node(cmd_message(vec![cmd_metric(
            "unknown",
            DataType::Boolean,
            metric::Value::BooleanValue(true),
        )])))
        .unwrap();
    broker
        .tx_event
        .send(Event::Node(cmd_message(vec![cmd_metric(
            "reboot",
            DataType::Boolean,
            metric::Value::BooleanValue(true),
        )])))
        .unwrap();

    let updates = timeout(Duration::from_secs(1), cmd_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].name, "reboot");
    assert_eq!(updates[0].value, MetricKind::Bool(true));
}

#[tokio::test]
async fn state_messages_reach_the_callback() {
    let (state_tx, mut state_rx) = tokio::sync::mpsc::unbounded_channel();
    let (eventloop, client, mut broker) = ChannelEventLoop::new();
    let (session, _handle) = node_session(EntityBuilder::new(eventloop, client).on_state(
        move |host_id, message| {
            state_tx.send((host_id.to_string(), message.clone())).unwrap();
        },
    ));
    tokio::spawn(async move { session.run().await });

    establish_online(&mut broker).await;
    broker
        .tx_event
        .send(Event::State {
            host_id: "scada".to_string(),
            message: StateMessage::Simple(StatePayload::Online),
        })
        .unwrap();

    let (host_id, message) = timeout(Duration::from_secs(1), state_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(host_id, "scada");
    assert_eq!(message, StateMessage::Simple(StatePayload::Online));
}

#[tokio::test]
async fn wait_online_times_out_when_never_online() {
    let (eventloop, client, _broker) = ChannelEventLoop::new();
    let (session, handle) = node_session(EntityBuilder::new(eventloop, client));
    tokio::spawn(async move { session.run().await });

    assert!(!handle.wait_online(Duration::from_millis(50)).await);
}

#[tokio::test]
async fn builder_rejects_missing_and_invalid_ids() {
    let (eventloop, client, _broker) = ChannelEventLoop::new();
    assert!(EntityBuilder::new(eventloop, client)
        .with_group_id(GROUP_ID)
        .build()
        .is_err());

    let (eventloop, client, _broker) = ChannelEventLoop::new();
    assert!(EntityBuilder::new(eventloop, client)
        .with_group_id("bad/group")
        .with_node_id(NODE_ID)
        .build()
        .is_err());

    let (eventloop, client, _broker) = ChannelEventLoop::new();
    assert!(EntityBuilder::new(eventloop, client)
        .with_group_id(GROUP_ID)
        .with_node_id(NODE_ID)
        .with_device_id("dev+1")
        .build()
        .is_err());
}
