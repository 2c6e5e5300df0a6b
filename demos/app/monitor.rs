use log::{info, LevelFilter};
use sprig::{
    app::{App, SubscriptionConfig},
    client_rumqtt as rumqtt,
};

#[tokio::main]
async fn main() {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .init();

    let opts = rumqtt::MqttOptions::new("monitor", "localhost", 1883);
    let (eventloop, client) = rumqtt::EventLoop::new(opts, 0);

    let (application, handle) =
        App::new("monitor", SubscriptionConfig::AllGroups, eventloop, client).unwrap();

    let birth_handle = handle.clone();
    let application = application
        .on_online(|| info!("Connected to the broker"))
        .on_offline(|| info!("Lost the broker connection"))
        .on_node_discovered(|node| info!("Discovered node {node}"))
        .on_device_discovered(|node, device| info!("Discovered device {node}/{device}"))
        .on_nbirth(move |node, _payload| {
            let commands: Vec<String> = birth_handle
                .with_node(node, |entity| {
                    entity
                        .commands
                        .names()
                        .iter()
                        .map(|name| name.to_string())
                        .collect()
                })
                .unwrap_or_default();
            info!("{node} is born, accepts commands {commands:?}");
        })
        .on_ndeath(|node, _payload| info!("{node} died"))
        .on_ddata(|node, device, payload| {
            info!("{node}/{device} reported {} metrics", payload.metrics.len())
        });

    let stopper = handle.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            println!("Failed to register CTRL-C handler: {e}");
            return;
        }
        stopper.cancel().await;
    });

    application.run().await;
}
