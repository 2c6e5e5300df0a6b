use log::LevelFilter;
use sprig::{
    client_rumqtt as rumqtt,
    entity::EntityBuilder,
    types::{utils, MetricKind},
};
use std::time::Duration;

use tokio::time;

#[tokio::main]
async fn main() {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .init();

    let opts = rumqtt::MqttOptions::new("device", "localhost", 1883);
    let (eventloop, client) = rumqtt::EventLoop::new(opts, 0);

    let (session, handle) = EntityBuilder::new(eventloop, client)
        .with_group_id("factory")
        .with_node_id("press")
        .with_device_id("sensor-1")
        .on_command(|updates| {
            for update in updates {
                println!("Got CMD {} = {:?}", update.name, update.value);
            }
        })
        .build()
        .unwrap();

    handle.set_attribute("model", "VS-200");
    handle.set_data("vibration", 0.0);
    handle.set_command("valve", false);

    let publisher = handle.clone();
    tokio::spawn(async move {
        if !publisher.wait_online(Duration::from_secs(5)).await {
            println!("No broker connection, giving up");
            publisher.cancel().await;
            return;
        }
        publisher.publish_birth().await.unwrap();

        //sample at 10Hz, flush one series per second
        let mut values: Vec<MetricKind> = Vec::new();
        let mut timestamps = Vec::new();
        let mut sample = 0.0_f64;
        loop {
            time::sleep(Duration::from_millis(100)).await;
            sample = (sample + 0.37) % 3.0;
            values.push(sample.into());
            timestamps.push(utils::timestamp());
            if values.len() < 10 {
                continue;
            }
            let series_values = std::mem::take(&mut values);
            let series_timestamps = std::mem::take(&mut timestamps);
            publisher.update(|entity| {
                entity
                    .data
                    .set_series("vibration", series_values, series_timestamps)
            });
            _ = publisher.publish_data(false).await;
        }
    });

    let stopper = handle.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            println!("Failed to register CTRL-C handler: {e}");
            return;
        }
        stopper.cancel().await;
    });

    session.run().await;
}
