/// Gateway configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the TCP listener binds to.
    pub bind_addr: String,
    /// Port the TCP listener binds to.
    pub port: u16,
    /// Size of one outbound send buffer; frames are batched up to this size.
    pub send_buffer_size: usize,
    /// Whether to set TCP_NODELAY on accepted sockets.
    pub tcp_nodelay: bool,
    /// Cadence of the update tick that drains session and connection queues.
    pub update_interval_ms: u64,
    /// Minimum allowed interval between client pings, in seconds.
    pub min_ping_interval_secs: u64,
    /// How many over-speed pings are tolerated before the client is kicked.
    /// Zero disables the check.
    pub max_overspeed_pings: u32,
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("CROSSLINK_BIND")
                .unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parsed_var("CROSSLINK_PORT").unwrap_or(8085),
            send_buffer_size: parsed_var("CROSSLINK_SEND_BUFFER_SIZE").unwrap_or(4096),
            tcp_nodelay: parsed_var("CROSSLINK_TCP_NODELAY").unwrap_or(true),
            update_interval_ms: parsed_var("CROSSLINK_UPDATE_INTERVAL_MS").unwrap_or(10),
            min_ping_interval_secs: parsed_var("CROSSLINK_MIN_PING_INTERVAL_SECS").unwrap_or(10),
            max_overspeed_pings: parsed_var("CROSSLINK_MAX_OVERSPEED_PINGS").unwrap_or(5),
        }
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_env_is_unset() {
        let config = Config::from_env();
        assert_eq!(config.send_buffer_size, 4096);
        assert_eq!(config.max_overspeed_pings, 5);
        assert_eq!(config.min_ping_interval_secs, 10);
    }
}
