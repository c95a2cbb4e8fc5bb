use std::net::SocketAddr;

/// Where the server listens and what it serves besides the API
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Directory with the browser client
    pub static_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 6574)),
            static_dir: "static".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let addr = match std::env::var("MINDREAD_ADDR") {
            Ok(value) => value.trim().parse().unwrap_or_else(|e| {
                tracing::warn!("Ignoring invalid MINDREAD_ADDR {:?}: {}", value, e);
                defaults.addr
            }),
            Err(_) => defaults.addr,
        };

        let static_dir = std::env::var("MINDREAD_STATIC_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.static_dir);

        tracing::info!(%addr, static_dir = %static_dir, "Server config loaded");

        Self { addr, static_dir }
    }
}
