//! Device identity from the factory MAC.
//!
//! `FL-XXYYZZ` (last three MAC bytes, uppercase hex).  Used as the broker
//! client id and in every topic path, so it must be stable across reboots
//! and firmware updates; the eFuse MAC is.

use core::fmt::Write;

pub type DeviceId = heapless::String<16>;

pub type MacAddress = [u8; 6];

#[cfg(target_os = "espidf")]
pub fn factory_mac() -> MacAddress {
    let mut mac = [0u8; 6];
    // SAFETY: mac is a 6-byte out-buffer as the API requires.
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

#[cfg(not(target_os = "espidf"))]
pub fn factory_mac() -> MacAddress {
    [0x24, 0x0A, 0xC4, 0x5E, 0x10, 0x7B]
}

/// MAC for the W5500, which has none of its own.
#[cfg(target_os = "espidf")]
pub fn ethernet_mac() -> MacAddress {
    let mut mac = [0u8; 6];
    // SAFETY: as above.
    unsafe {
        esp_idf_svc::sys::esp_read_mac(mac.as_mut_ptr(), esp_idf_svc::sys::esp_mac_type_t_ESP_MAC_ETH);
    }
    mac
}

pub fn device_id(mac: &MacAddress) -> DeviceId {
    let mut id = DeviceId::new();
    let _ = write!(id, "FL-{:02X}{:02X}{:02X}", mac[3], mac[4], mac[5]);
    id
}
