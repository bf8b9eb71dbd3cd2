use serde_derive::Deserialize;
use serde_derive::Serialize;

mod zookeeper;

pub use self::zookeeper::ZookeeperConfig;

/// Backend specific configuration options.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(tag = "backend", content = "options", deny_unknown_fields)]
pub enum Backend {
    /// Use zookeeper as a coordination system (recommended, default).
    #[serde(rename = "zookeeper")]
    Zookeeper(ZookeeperConfig),
}

impl Default for Backend {
    fn default() -> Backend {
        Backend::Zookeeper(ZookeeperConfig::default())
    }
}

/// Distributed locking and election configuration options.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, flatten)]
    pub backend: Backend,

    /// Root node all named locks are created under.
    #[serde(default = "Config::default_lock_root")]
    pub lock_root: String,

    /// Root node all elections are created under.
    #[serde(default = "Config::default_election_root")]
    pub election_root: String,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            backend: Backend::default(),
            lock_root: Config::default_lock_root(),
            election_root: Config::default_election_root(),
        }
    }
}

impl Config {
    fn default_lock_root() -> String {
        "/_zklocking".into()
    }

    fn default_election_root() -> String {
        "/_zkelection".into()
    }
}

#[cfg(test)]
mod tests {
    use super::Backend;
    use super::Config;
    use super::ZookeeperConfig;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.lock_root, "/_zklocking");
        assert_eq!(config.election_root, "/_zkelection");
        let Backend::Zookeeper(zookeeper) = config.backend;
        assert_eq!(zookeeper, ZookeeperConfig::default());
    }

    #[test]
    fn zookeeper_defaults() {
        let config = ZookeeperConfig::default();
        assert_eq!(config.ensemble, "localhost:2181");
        assert_eq!(config.timeout, 10);
    }
}
