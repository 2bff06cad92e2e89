//! Wired link: W5500 SPI Ethernet with DHCP.
//!
//! The W5500 path carries no TLS, so the session layer forces plain MQTT on
//! port 1883 whenever this link is active.

use log::{info, warn};

use crate::app::ports::LinkPort;
use crate::config::ETH_DHCP_TIMEOUT_MS;
use crate::error::NetworkError;

#[cfg(target_os = "espidf")]
use esp_idf_svc::eth::{BlockingEth, EspEth, SpiEth};
#[cfg(target_os = "espidf")]
use esp_idf_svc::hal::spi::SpiDriver;

#[cfg(target_os = "espidf")]
pub type W5500 = BlockingEth<EspEth<'static, SpiEth<SpiDriver<'static>>>>;

pub struct EthernetLink {
    #[cfg(target_os = "espidf")]
    eth: W5500,
    started: bool,
    #[cfg(not(target_os = "espidf"))]
    sim_cable: bool,
}

impl EthernetLink {
    #[cfg(target_os = "espidf")]
    pub fn new(eth: W5500) -> Self {
        Self { eth, started: false }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new() -> Self {
        Self { started: false, sim_cable: true }
    }

    /// Simulation: plug or pull the cable.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_set_cable(&mut self, plugged: bool) {
        self.sim_cable = plugged;
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for EthernetLink {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkPort for EthernetLink {
    fn bring_up(&mut self) -> Result<(), NetworkError> {
        info!("ETH: bringing up W5500, DHCP budget {} ms", ETH_DHCP_TIMEOUT_MS);

        #[cfg(target_os = "espidf")]
        {
            use esp_idf_svc::hal::delay::FreeRtos;

            if !self.started {
                self.eth.start().map_err(|e| {
                    warn!("ETH: start failed: {}", e);
                    NetworkError::LinkDown
                })?;
                self.started = true;
            }
            let mut waited = 0;
            while !self.eth.is_up().unwrap_or(false) {
                if waited >= ETH_DHCP_TIMEOUT_MS {
                    let link = self.eth.is_connected().unwrap_or(false);
                    warn!("ETH: no lease after {} ms (link {})", waited, if link { "up" } else { "down" });
                    return Err(if link { NetworkError::LeaseTimeout } else { NetworkError::LinkDown });
                }
                FreeRtos::delay_ms(100);
                waited += 100;
            }
            if let Ok(ip) = self.eth.eth().netif().get_ip_info() {
                info!("ETH: up, IP {}", ip.ip);
            }
            Ok(())
        }

        #[cfg(not(target_os = "espidf"))]
        {
            if !self.sim_cable {
                warn!("ETH(sim): no cable");
                return Err(NetworkError::LinkDown);
            }
            self.started = true;
            Ok(())
        }
    }

    fn is_up(&mut self) -> bool {
        if !self.started {
            return false;
        }

        #[cfg(target_os = "espidf")]
        {
            self.eth.is_up().unwrap_or(false)
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.sim_cable
        }
    }

    fn shutdown(&mut self) {
        if !self.started {
            return;
        }
        #[cfg(target_os = "espidf")]
        let _ = self.eth.stop();
        self.started = false;
        info!("ETH: shut down");
    }
}
