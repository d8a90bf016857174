use serde::Deserialize;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub hub: HubSettings,
    pub persistence: PersistenceSettings,
}

/// Where the server listens and how it introduces itself to others.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub client_port: u16,
    pub server_port: u16,
    /// Public address clients use, advertised in greetings.
    pub client_address: String,
    /// Public address other servers use.
    pub server_address: String,
    /// Only this key may create organizations, if set.
    pub owner_public_key: Option<String>,
    /// Server endpoints to dial at startup.
    pub peers: Vec<String>,
}

/// Dispatch and gossip tuning.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct HubSettings {
    pub workers: usize,
    pub inbound_capacity: usize,
    pub max_retry: usize,
    pub rumor_buffer_ttl_ms: u64,
    pub rumor_delay_ms: u64,
    pub rumor_max_messages: usize,
    pub rumor_state_delay_ms: u64,
    pub heartbeat_delay_ms: u64,
    pub query_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PersistenceSettings {
    pub path: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub hub: Option<PartialHubSettings>,
    pub persistence: Option<PartialPersistenceSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub client_port: Option<u16>,
    pub server_port: Option<u16>,
    pub client_address: Option<String>,
    pub server_address: Option<String>,
    pub owner_public_key: Option<String>,
    pub peers: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialHubSettings {
    pub workers: Option<usize>,
    pub inbound_capacity: Option<usize>,
    pub max_retry: Option<usize>,
    pub rumor_buffer_ttl_ms: Option<u64>,
    pub rumor_delay_ms: Option<u64>,
    pub rumor_max_messages: Option<usize>,
    pub rumor_state_delay_ms: Option<u64>,
    pub heartbeat_delay_ms: Option<u64>,
    pub query_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialPersistenceSettings {
    pub path: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                client_port: 9000,
                server_port: 9001,
                client_address: "ws://127.0.0.1:9000/client".to_string(),
                server_address: "ws://127.0.0.1:9001/server".to_string(),
                owner_public_key: None,
                peers: Vec::new(),
            },
            hub: HubSettings::default(),
            persistence: PersistenceSettings {
                path: "popstellar_db".to_string(),
            },
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            workers: 10,
            inbound_capacity: 1024,
            max_retry: 10,
            rumor_buffer_ttl_ms: 3_000,
            rumor_delay_ms: 5_000,
            rumor_max_messages: 30,
            rumor_state_delay_ms: 5_000,
            heartbeat_delay_ms: 30_000,
            query_timeout_ms: 60_000,
        }
    }
}

impl PartialSettings {
    /// Fill every missing value from `default`.
    pub fn merge(self, default: Settings) -> Settings {
        let server = self.server.unwrap_or_default();
        let hub = self.hub.unwrap_or_default();
        let persistence = self.persistence.unwrap_or_default();

        let host = server.host.unwrap_or(default.server.host);
        let client_port = server.client_port.unwrap_or(default.server.client_port);
        let server_port = server.server_port.unwrap_or(default.server.server_port);

        Settings {
            server: ServerSettings {
                client_address: server
                    .client_address
                    .unwrap_or_else(|| format!("ws://{host}:{client_port}/client")),
                server_address: server
                    .server_address
                    .unwrap_or_else(|| format!("ws://{host}:{server_port}/server")),
                host,
                client_port,
                server_port,
                owner_public_key: server
                    .owner_public_key
                    .filter(|k| !k.is_empty())
                    .or(default.server.owner_public_key),
                peers: server.peers.unwrap_or(default.server.peers),
            },
            hub: HubSettings {
                workers: hub.workers.unwrap_or(default.hub.workers),
                inbound_capacity: hub
                    .inbound_capacity
                    .unwrap_or(default.hub.inbound_capacity),
                max_retry: hub.max_retry.unwrap_or(default.hub.max_retry),
                rumor_buffer_ttl_ms: hub
                    .rumor_buffer_ttl_ms
                    .unwrap_or(default.hub.rumor_buffer_ttl_ms),
                rumor_delay_ms: hub.rumor_delay_ms.unwrap_or(default.hub.rumor_delay_ms),
                rumor_max_messages: hub
                    .rumor_max_messages
                    .unwrap_or(default.hub.rumor_max_messages),
                rumor_state_delay_ms: hub
                    .rumor_state_delay_ms
                    .unwrap_or(default.hub.rumor_state_delay_ms),
                heartbeat_delay_ms: hub
                    .heartbeat_delay_ms
                    .unwrap_or(default.hub.heartbeat_delay_ms),
                query_timeout_ms: hub
                    .query_timeout_ms
                    .unwrap_or(default.hub.query_timeout_ms),
            },
            persistence: PersistenceSettings {
                path: persistence.path.unwrap_or(default.persistence.path),
            },
        }
    }
}
