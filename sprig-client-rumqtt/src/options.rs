use rumqttc::{v5::mqttbytes::v5::ConnectProperties, TlsConfiguration};

pub struct ConnectionProperties {
    pub receive_maximum: Option<u16>,
    pub max_packet_size: Option<u32>,
}

pub enum Transport {
    Tcp,
    /// TLS with a CA certificate in PEM or DER form and an optional client
    /// certificate and key pair
    Tls {
        ca: Vec<u8>,
        client_auth: Option<(Vec<u8>, Vec<u8>)>,
    },
}

pub struct MqttOptions {
    pub broker_addr: String,
    pub port: u16,
    pub client_id: String,
    pub transport: Transport,
    pub credentials: Option<(String, String)>,
    pub connect_properties: Option<ConnectionProperties>,
}

impl MqttOptions {
    pub fn new<S: Into<String>, S1: Into<String>>(client_id: S, addr: S1, port: u16) -> Self {
        Self {
            broker_addr: addr.into(),
            port,
            client_id: client_id.into(),
            transport: Transport::Tcp,
            credentials: None,
            connect_properties: None,
        }
    }

    pub fn set_credentials<S: Into<String>, S1: Into<String>>(
        &mut self,
        username: S,
        password: S1,
    ) -> &mut Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    pub fn set_transport(&mut self, transport: Transport) -> &mut Self {
        self.transport = transport;
        self
    }
}

impl From<MqttOptions> for rumqttc::v5::MqttOptions {
    fn from(value: MqttOptions) -> Self {
        let mut options =
            rumqttc::v5::MqttOptions::new(value.client_id, value.broker_addr, value.port);
        if let Some((username, password)) = value.credentials {
            options.set_credentials(username, password);
        }
        match value.transport {
            Transport::Tcp => (),
            Transport::Tls { ca, client_auth } => {
                options.set_transport(rumqttc::Transport::Tls(TlsConfiguration::Simple {
                    ca,
                    alpn: None,
                    client_auth,
                }));
            }
        }
        if let Some(properties) = value.connect_properties {
            let mut connect_properties = ConnectProperties::new();
            connect_properties.receive_maximum = properties.receive_maximum;
            connect_properties.max_packet_size = properties.max_packet_size;
            options.set_connect_properties(connect_properties);
        }
        options
    }
}
