/// Gateway configuration, persisted as JSON in `~/.tnc_config.json`.
///
/// Keys are the uppercase names the terminal's `set` command has always
/// used; `on`/`off` values stay strings on disk.
use std::io;
use std::path::{Path, PathBuf};

use rs1200::ax25::{Address, Callsign};
use rs1200::source::TncAddress;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_AGWPE_PORT: u16 = 8000;
pub const DEFAULT_TNC_PORT: u16 = 8001;
pub const DEFAULT_WEBUI_PORT: u16 = 8002;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "MYCALL")]
    pub mycall: String,
    /// Maidenhead locator used for beacons when no GPS is around.
    #[serde(rename = "MYLOCATION", skip_serializing_if = "Option::is_none")]
    pub mylocation: Option<String>,
    /// BLE peer address of the handheld.
    #[serde(rename = "RADIO_MAC", skip_serializing_if = "Option::is_none")]
    pub radio_mac: Option<String>,
    /// Serial or TCP TNC endpoint, overrides RADIO_MAC when set.
    #[serde(rename = "TNC_ADDRESS", skip_serializing_if = "Option::is_none")]
    pub tnc_address: Option<String>,
    /// KISS TXDELAY in 10 ms units.
    #[serde(rename = "TXDELAY")]
    pub txdelay: u8,
    /// Message retry budget.
    #[serde(rename = "RETRY")]
    pub retry: u32,
    /// Fast retry interval, seconds.
    #[serde(rename = "RETRY_FAST")]
    pub retry_fast: u64,
    /// Slow retry interval, seconds.
    #[serde(rename = "RETRY_SLOW")]
    pub retry_slow: u64,
    #[serde(rename = "DIGIPEAT", with = "on_off")]
    pub digipeat: bool,
    #[serde(rename = "MYALIAS", skip_serializing_if = "Option::is_none")]
    pub myalias: Option<String>,
    #[serde(rename = "AUTO_ACK", with = "on_off")]
    pub auto_ack: bool,
    #[serde(rename = "BEACON", with = "on_off")]
    pub beacon: bool,
    /// Beacon interval, seconds.
    #[serde(rename = "BEACON_INTERVAL")]
    pub beacon_interval: u64,
    /// Comma-separated digipeater path for beacons.
    #[serde(rename = "BEACON_PATH")]
    pub beacon_path: String,
    /// Symbol table byte then symbol code byte.
    #[serde(rename = "BEACON_SYMBOL")]
    pub beacon_symbol: String,
    #[serde(rename = "BEACON_COMMENT")]
    pub beacon_comment: String,
    /// Frame buffer cap in MB, or `off` for a tiny ring.
    #[serde(rename = "DEBUG_BUFFER")]
    pub debug_buffer: String,
    #[serde(rename = "AGWPE_PORT")]
    pub agwpe_port: u16,
    #[serde(rename = "TNC_PORT")]
    pub tnc_port: u16,
    #[serde(rename = "WEBUI_PORT")]
    pub webui_port: u16,
    #[serde(rename = "WEBUI_PASSWORD", skip_serializing_if = "Option::is_none")]
    pub webui_password: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mycall: "N0CALL".to_string(),
            mylocation: None,
            radio_mac: None,
            tnc_address: None,
            txdelay: 30,
            retry: 3,
            retry_fast: 20,
            retry_slow: 600,
            digipeat: false,
            myalias: None,
            auto_ack: true,
            beacon: false,
            beacon_interval: 1800,
            beacon_path: "WIDE1-1,WIDE2-1".to_string(),
            beacon_symbol: "/-".to_string(),
            beacon_comment: String::new(),
            debug_buffer: "10".to_string(),
            agwpe_port: DEFAULT_AGWPE_PORT,
            tnc_port: DEFAULT_TNC_PORT,
            webui_port: DEFAULT_WEBUI_PORT,
            webui_password: None,
        }
    }
}

mod on_off {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &bool,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if *value { "on" } else { "off" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<bool, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.to_lowercase().as_str() {
            "on" | "true" | "1" => Ok(true),
            "off" | "false" | "0" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected on/off, got {other:?}"
            ))),
        }
    }
}

impl Config {
    pub fn path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tnc_config.json")
    }

    /// Best effort: a missing or corrupt file starts from defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(config) => config,
                Err(e) => {
                    warn!("{}: {e}, starting with defaults", path.display());
                    Config::default()
                }
            },
            Err(_) => Config::default(),
        }
    }

    /// Atomic write-then-rename.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, path)
    }

    pub fn mycall(&self) -> Callsign {
        self.mycall.parse().unwrap_or_else(|_| {
            warn!("invalid MYCALL {:?}, using N0CALL", self.mycall);
            "N0CALL".parse().expect("N0CALL is valid")
        })
    }

    /// The transport endpoint: TNC_ADDRESS wins, then RADIO_MAC.
    pub fn tnc(&self) -> Option<TncAddress> {
        if let Some(address) = &self.tnc_address {
            match address.parse() {
                Ok(parsed) => return Some(parsed),
                Err(e) => warn!("TNC_ADDRESS: {e}"),
            }
        }
        if let Some(mac) = &self.radio_mac {
            match format!("ble:{mac}").parse() {
                Ok(parsed) => return Some(parsed),
                Err(e) => warn!("RADIO_MAC: {e}"),
            }
        }
        None
    }

    pub fn beacon_path(&self) -> Vec<Address> {
        self.beacon_path
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .filter_map(|s| s.trim().parse().ok())
            .map(Address::new)
            .collect()
    }

    pub fn beacon_symbol(&self) -> (char, char) {
        let mut chars = self.beacon_symbol.chars();
        let table = chars.next().unwrap_or('/');
        let code = chars.next().unwrap_or('-');
        (table, code)
    }

    /// Digipeater aliases we answer to, MYALIAS plus the standard WIDEs.
    pub fn digi_aliases(&self) -> Vec<String> {
        let mut aliases = vec![
            "WIDE1".to_string(),
            "WIDE2".to_string(),
            "RELAY".to_string(),
        ];
        if let Some(alias) = &self.myalias {
            aliases.insert(0, alias.to_uppercase());
        }
        aliases
    }

    /// Frame buffer cap in bytes; `off` keeps a tiny diagnostic ring.
    pub fn debug_buffer_bytes(&self) -> usize {
        match self.debug_buffer.to_lowercase().as_str() {
            "off" => 64 * 1024,
            value => value
                .parse::<usize>()
                .map(|mb| mb * 1024 * 1024)
                .unwrap_or(10 * 1024 * 1024),
        }
    }
}
