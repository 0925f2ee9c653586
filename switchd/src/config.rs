use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub enum Backend {
    /// Drive the server by spawning its command-line control tool.
    Pacmd { binary: Option<String> },
    /// Talk the native protocol through libpulse.
    Native,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub shell_address: std::net::SocketAddr,

    pub backend: Backend,

    pub command_timeout_ms: Option<u64>,
}

impl Config {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms.unwrap_or(3_000))
    }
}

pub fn load_config<P: AsRef<std::path::Path>>(path: P) -> Result<Config> {
    use std::fs::File;
    use std::io::BufReader;

    let file = File::open(path)?;
    let reader = BufReader::new(file);

    serde_json::from_reader(reader).map_err(|e| anyhow!("{:?}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_complete_document() {
        let config: Config = serde_json::from_str(
            r#"{
                "shell_address": "127.0.0.1:9024",
                "backend": { "Pacmd": { "binary": "pacmd" } },
                "command_timeout_ms": 1500
            }"#,
        )
        .unwrap();

        assert_eq!(config.command_timeout(), Duration::from_millis(1500));
        match config.backend {
            Backend::Pacmd { binary } => assert_eq!(binary.as_deref(), Some("pacmd")),
            other => panic!("unexpected backend: {:?}", other),
        }
    }

    #[test]
    fn timeout_defaults_to_a_few_seconds() {
        let config: Config = serde_json::from_str(
            r#"{ "shell_address": "127.0.0.1:9024", "backend": "Native" }"#,
        )
        .unwrap();

        assert_eq!(config.command_timeout(), Duration::from_secs(3));
        assert!(matches!(config.backend, Backend::Native));
    }
}
