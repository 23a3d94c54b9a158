use crate::net::{address_table::MAX_CAPACITY, VirtualNetwork};
use crate::sfu::{KeyframeScheduler, PeerFactory, SessionRegistry, SyncEngine, SyncSettings};
use anyhow::{bail, Context};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: String,
    pub public_dir: PathBuf,
    /// Single UDP port all ICE traffic is muxed over
    pub udp_port: Option<u16>,
    /// Address advertised as the NAT 1:1 host candidate
    pub public_ip: Option<String>,
    pub stun_servers: Vec<String>,
    pub x_powered_by: Option<String>,
    pub address_capacity: usize,
    pub datagram_queue_capacity: usize,
    pub engine_poll_timeout: Duration,
    pub sync_attempt_limit: usize,
    pub sync_retry_delay: Duration,
    pub keyframe_interval: Duration,
    /// Pending negotiation rounds assigned when the track set changes
    pub signal_rounds: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:27016".to_string(),
            public_dir: PathBuf::from("public"),
            udp_port: None,
            public_ip: None,
            stun_servers: vec![],
            x_powered_by: Some("webrelay".to_string()),
            address_capacity: 128,
            datagram_queue_capacity: 256,
            engine_poll_timeout: Duration::from_millis(10),
            sync_attempt_limit: 25,
            sync_retry_delay: Duration::from_secs(3),
            keyframe_interval: Duration::from_secs(3),
            signal_rounds: 1,
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_var(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("Invalid value for {}: {:?}", name, raw))
        })
        .transpose()
}

fn parse_millis(name: &str, default: Duration) -> anyhow::Result<Duration> {
    Ok(parse_var::<u64>(name)?
        .map(Duration::from_millis)
        .unwrap_or(default))
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let defaults = Config::default();

        let bind_address = env_var("BIND_ADDRESS").unwrap_or(defaults.bind_address);
        let public_dir = env_var("PUBLIC_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.public_dir);

        let stun_servers = env_var("STUN_SERVERS")
            .map(|s| {
                s.split(',')
                    .map(|url| url.trim().to_string())
                    .filter(|url| !url.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let disable_powered_by = parse_var::<bool>("DISABLE_X_POWERED_BY")?.unwrap_or(false);
        let x_powered_by = if disable_powered_by {
            None
        } else {
            env_var("X_POWERED_BY_VALUE").or(defaults.x_powered_by)
        };

        let config = Config {
            bind_address,
            public_dir,
            udp_port: parse_var("PORT")?,
            public_ip: env_var("IP"),
            stun_servers,
            x_powered_by,
            address_capacity: parse_var("ADDRESS_CAPACITY")?.unwrap_or(defaults.address_capacity),
            datagram_queue_capacity: parse_var("DATAGRAM_QUEUE_CAPACITY")?
                .unwrap_or(defaults.datagram_queue_capacity),
            engine_poll_timeout: parse_millis("ENGINE_POLL_TIMEOUT_MS", defaults.engine_poll_timeout)?,
            sync_attempt_limit: parse_var("SYNC_ATTEMPT_LIMIT")?
                .unwrap_or(defaults.sync_attempt_limit),
            sync_retry_delay: parse_millis("SYNC_RETRY_DELAY_MS", defaults.sync_retry_delay)?,
            keyframe_interval: parse_millis("KEYFRAME_INTERVAL_MS", defaults.keyframe_interval)?,
            signal_rounds: parse_var("SIGNAL_ROUNDS")?.unwrap_or(defaults.signal_rounds),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.address_capacity == 0 || self.address_capacity > MAX_CAPACITY {
            bail!(
                "ADDRESS_CAPACITY must be between 1 and {}, got {}",
                MAX_CAPACITY,
                self.address_capacity
            );
        }
        if self.datagram_queue_capacity == 0 {
            bail!("DATAGRAM_QUEUE_CAPACITY must be at least 1");
        }
        if self.sync_attempt_limit == 0 {
            bail!("SYNC_ATTEMPT_LIMIT must be at least 1");
        }
        if self.signal_rounds == 0 {
            bail!("SIGNAL_ROUNDS must be at least 1");
        }
        if self.keyframe_interval.is_zero() {
            bail!("KEYFRAME_INTERVAL_MS must be at least 1");
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub registry: Arc<SessionRegistry>,
    pub sync: Arc<SyncEngine>,
    pub keyframes: Arc<KeyframeScheduler>,
    pub network: Arc<VirtualNetwork>,
    pub peers: Arc<PeerFactory>,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        config.validate()?;

        let registry = Arc::new(SessionRegistry::new(config.signal_rounds));
        let keyframes = Arc::new(KeyframeScheduler::new(
            registry.clone(),
            config.keyframe_interval,
        ));
        let sync = Arc::new(SyncEngine::new(
            registry.clone(),
            keyframes.clone(),
            SyncSettings {
                attempt_limit: config.sync_attempt_limit,
                retry_delay: config.sync_retry_delay,
            },
        ));
        let network = Arc::new(VirtualNetwork::new(
            config.address_capacity,
            config.datagram_queue_capacity,
        )?);
        let peers = Arc::new(PeerFactory::new(&config).await?);

        Ok(Self {
            config,
            registry,
            sync,
            keyframes,
            network,
            peers,
        })
    }

    /// Start the keyframe ticker and the deferred-retry worker
    pub fn spawn_background_tasks(&self) {
        tokio::spawn(self.keyframes.clone().run());
        tokio::spawn(self.sync.clone().run_retry_worker());
    }
}
