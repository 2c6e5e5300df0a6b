use log::LevelFilter;
use sprig::{client_rumqtt as rumqtt, entity::EntityBuilder};
use std::time::Duration;

use tokio::time;

#[tokio::main]
async fn main() {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .init();

    let opts = rumqtt::MqttOptions::new("node", "localhost", 1883);
    let (eventloop, client) = rumqtt::EventLoop::new(opts, 0);

    let (session, handle) = EntityBuilder::new(eventloop, client)
        .with_group_id("factory")
        .with_node_id("press")
        .on_command(|updates| {
            for update in updates {
                println!("Got CMD {} = {:?}", update.name, update.value);
            }
        })
        .build()
        .unwrap();

    handle.set_attribute("version", "1.0.0");
    handle.set_data("temperature", 20.0);
    handle.set_command("reboot", false);

    let publisher = handle.clone();
    tokio::spawn(async move {
        if !publisher.wait_online(Duration::from_secs(5)).await {
            println!("No broker connection, giving up");
            publisher.cancel().await;
            return;
        }
        publisher.publish_birth().await.unwrap();

        let mut temperature = 20.0;
        loop {
            time::sleep(Duration::from_secs(1)).await;
            temperature += 0.1;
            publisher.set_data("temperature", temperature);
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
