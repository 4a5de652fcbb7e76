use std::time::Duration;

/// Matchmaker tunables. The acceptance band starts at `initial_elo_range`
/// and widens by `increment` every `increment_interval` of waiting, capped
/// at `max_elo_range`.
#[derive(Debug, Clone)]
pub struct MatchmakingConfig {
    pub initial_elo_range: i32,
    pub increment: i32,
    pub max_elo_range: i32,
    pub increment_interval: Duration,
    pub entry_ttl: Duration,
    pub pass_interval: Duration,
    pub sweep_interval: Duration,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        MatchmakingConfig {
            initial_elo_range: 100,
            increment: 50,
            max_elo_range: 500,
            increment_interval: Duration::from_secs(5),
            entry_ttl: Duration::from_secs(60),
            pass_interval: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(10),
        }
    }
}

/// Puzzle cache tunables.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            max_entries: 1000,
            ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub database_url: String,
    pub max_connections: u32,
    /// Per-client outbound queue; overflow evicts the client.
    pub send_queue: usize,
    /// Inbound frame size limit in bytes.
    pub read_limit: usize,
    pub pong_wait: Duration,
    /// A game with no movement past this limit is forfeited or abandoned.
    pub idle_game_limit: Duration,
    /// Completed rooms linger this long for late subscribers.
    pub completed_room_ttl: Duration,
    pub practice_idle_limit: Duration,
    pub matchmaking: MatchmakingConfig,
    pub cache: CacheConfig,
}

impl ServerConfig {
    /// Interval between server pings, derived from the pong deadline.
    pub fn ping_period(&self) -> Duration {
        self.pong_wait.mul_f64(0.9)
    }

    /// Defaults overridden from the environment where set.
    pub fn from_env() -> ServerConfig {
        let mut config = ServerConfig::default();
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port) = port.parse() {
                config.port = port;
            }
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Ok(max) = std::env::var("HECTOC_MAX_CONNECTIONS") {
            if let Ok(max) = max.parse() {
                config.max_connections = max;
            }
        }
        config
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 8080,
            database_url: "sqlite:hectoc.db?mode=rwc".to_string(),
            max_connections: 100,
            send_queue: 256,
            read_limit: 10 * 1024,
            pong_wait: Duration::from_secs(60),
            idle_game_limit: Duration::from_secs(300),
            completed_room_ttl: Duration::from_secs(300),
            practice_idle_limit: Duration::from_secs(30 * 60),
            matchmaking: MatchmakingConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}
