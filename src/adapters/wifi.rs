//! WiFi station link.
//!
//! Implements [`LinkPort`] for the wireless transport.  Credentials come from
//! the `wifi` NVS namespace, falling back to the build-time
//! `FIELDLINK_WIFI_SSID` / `FIELDLINK_WIFI_PASS`; `WIFI_RESET` erases the
//! namespace so the next boot uses the build-time values.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `BlockingWifi<EspWifi>` station mode.
//! - **all other targets**: a simulated link whose availability the host
//!   sets directly.
//!
//! The first bring-up (at boot) may take [`WIFI_CONNECT_TIMEOUT_MS`]; later
//! ones happen during failover and are held to [`WIFI_FAILOVER_TIMEOUT_MS`].

use core::fmt;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{ConfigStore, LinkPort};
use crate::config::{WIFI_CONNECT_TIMEOUT_MS, WIFI_FAILOVER_TIMEOUT_MS};
use crate::error::NetworkError;

#[cfg(target_os = "espidf")]
use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};

pub const WIFI_NAMESPACE: &str = "wifi";
const CREDENTIALS_KEY: &str = "creds";

// ───────────────────────────────────────────────────────────────
// Credentials
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialError {
    InvalidSsid,
    InvalidPassword,
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSsid => write!(f, "SSID must be 1-32 printable ASCII bytes"),
            Self::InvalidPassword => write!(f, "password must be 8-64 bytes, or empty for an open network"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiCredentials {
    pub ssid: heapless::String<32>,
    pub password: heapless::String<64>,
}

impl WifiCredentials {
    pub fn new(ssid: &str, password: &str) -> Result<Self, CredentialError> {
        if ssid.is_empty() || !ssid.bytes().all(|b| (0x20..=0x7E).contains(&b)) {
            return Err(CredentialError::InvalidSsid);
        }
        if !password.is_empty() && !(8..=64).contains(&password.len()) {
            return Err(CredentialError::InvalidPassword);
        }
        let mut c = Self::default();
        c.ssid.push_str(ssid).map_err(|_| CredentialError::InvalidSsid)?;
        c.password.push_str(password).map_err(|_| CredentialError::InvalidPassword)?;
        Ok(c)
    }

    /// Build-time defaults, if any were compiled in.
    pub fn from_build_env() -> Option<Self> {
        let ssid = option_env!("FIELDLINK_WIFI_SSID")?;
        Self::new(ssid, option_env!("FIELDLINK_WIFI_PASS").unwrap_or("")).ok()
    }

    /// Stored credentials, else build-time defaults.
    pub fn load(store: &impl ConfigStore) -> Option<Self> {
        match store.get::<Self>(WIFI_NAMESPACE, CREDENTIALS_KEY) {
            Ok(c) if !c.ssid.is_empty() => Some(c),
            _ => Self::from_build_env(),
        }
    }

    pub fn save(&self, store: &mut impl ConfigStore) -> Result<(), crate::app::ports::ConfigError> {
        store.put(WIFI_NAMESPACE, CREDENTIALS_KEY, self)
    }

    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }
}

// ───────────────────────────────────────────────────────────────
// Link
// ───────────────────────────────────────────────────────────────

pub struct WifiLink {
    credentials: Option<WifiCredentials>,
    bring_ups: u32,
    #[cfg(target_os = "espidf")]
    wifi: BlockingWifi<EspWifi<'static>>,
    #[cfg(not(target_os = "espidf"))]
    sim_available: bool,
    #[cfg(not(target_os = "espidf"))]
    sim_up: bool,
}

impl WifiLink {
    #[cfg(target_os = "espidf")]
    pub fn new(wifi: BlockingWifi<EspWifi<'static>>, credentials: Option<WifiCredentials>) -> Self {
        Self { credentials, bring_ups: 0, wifi }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new(credentials: Option<WifiCredentials>) -> Self {
        Self { credentials, bring_ups: 0, sim_available: true, sim_up: false }
    }

    /// Simulation: whether an access point is in range.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_set_available(&mut self, available: bool) {
        self.sim_available = available;
        if !available {
            self.sim_up = false;
        }
    }

    fn timeout_ms(&self) -> u32 {
        if self.bring_ups == 0 { WIFI_CONNECT_TIMEOUT_MS } else { WIFI_FAILOVER_TIMEOUT_MS }
    }

    #[cfg(target_os = "espidf")]
    fn platform_bring_up(&mut self, creds: &WifiCredentials, timeout_ms: u32) -> Result<(), NetworkError> {
        use esp_idf_svc::hal::delay::FreeRtos;

        let config = Configuration::Client(ClientConfiguration {
            ssid: creds.ssid.as_str().try_into().map_err(|_| NetworkError::NotConfigured)?,
            password: creds.password.as_str().try_into().map_err(|_| NetworkError::NotConfigured)?,
            auth_method: if creds.is_open() { AuthMethod::None } else { AuthMethod::WPAWPA2Personal },
            ..Default::default()
        });
        self.wifi.set_configuration(&config).map_err(|_| NetworkError::NotConfigured)?;
        if !self.wifi.is_started().unwrap_or(false) {
            self.wifi.start().map_err(|_| NetworkError::LinkDown)?;
        }
        if let Err(e) = self.wifi.connect() {
            warn!("WiFi: association with '{}' failed: {}", creds.ssid, e);
            return Err(NetworkError::LinkDown);
        }

        let mut waited = 0;
        while !self.wifi.is_up().unwrap_or(false) {
            if waited >= timeout_ms {
                let _ = self.wifi.disconnect();
                return Err(NetworkError::LeaseTimeout);
            }
            FreeRtos::delay_ms(100);
            waited += 100;
        }
        if let Ok(ip) = self.wifi.wifi().sta_netif().get_ip_info() {
            info!("WiFi: up, IP {}", ip.ip);
        }
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_bring_up(&mut self, creds: &WifiCredentials, _timeout_ms: u32) -> Result<(), NetworkError> {
        if !self.sim_available {
            return Err(NetworkError::LinkDown);
        }
        self.sim_up = true;
        info!("WiFi(sim): joined '{}'", creds.ssid);
        Ok(())
    }
}

impl LinkPort for WifiLink {
    fn bring_up(&mut self) -> Result<(), NetworkError> {
        let Some(creds) = self.credentials.clone() else {
            warn!("WiFi: no credentials configured");
            return Err(NetworkError::NotConfigured);
        };
        let timeout = self.timeout_ms();
        self.bring_ups += 1;
        info!("WiFi: connecting to '{}' ({} ms budget)", creds.ssid, timeout);
        self.platform_bring_up(&creds, timeout)
    }

    fn is_up(&mut self) -> bool {
        #[cfg(target_os = "espidf")]
        {
            self.wifi.is_up().unwrap_or(false)
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.sim_up && self.sim_available
        }
    }

    fn shutdown(&mut self) {
        #[cfg(target_os = "espidf")]
        {
            let _ = self.wifi.disconnect();
            let _ = self.wifi.stop();
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.sim_up = false;
        }
        info!("WiFi: shut down");
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
