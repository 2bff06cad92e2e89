//! HTTP(S) firmware updater.
//!
//! Streams the image from the given URL into the inactive OTA slot, marks
//! it bootable and restarts.  Any failure drops the in-progress update,
//! which leaves the running image and the boot partition untouched.

use log::{info, warn};

use crate::app::ports::FirmwareUpdater;
use crate::error::FirmwareUpdateError;

/// Largest image the OTA slots can hold.
pub const MAX_IMAGE_BYTES: usize = 0x1F_0000;

const CHUNK: usize = 1024;

/// Pump `read` into `write` until EOF.  Verifies the total against the
/// announced length, when there is one.
pub fn copy_image(
    mut read: impl FnMut(&mut [u8]) -> Result<usize, FirmwareUpdateError>,
    mut write: impl FnMut(&[u8]) -> Result<(), FirmwareUpdateError>,
    expected_len: Option<usize>,
) -> Result<usize, FirmwareUpdateError> {
    if expected_len.is_some_and(|n| n > MAX_IMAGE_BYTES) {
        return Err(FirmwareUpdateError::Write);
    }
    let mut buf = [0u8; CHUNK];
    let mut total = 0usize;
    loop {
        let n = read(&mut buf)?;
        if n == 0 {
            break;
        }
        total += n;
        if total > MAX_IMAGE_BYTES {
            return Err(FirmwareUpdateError::Write);
        }
        write(&buf[..n])?;
    }
    if total == 0 || expected_len.is_some_and(|n| n != total) {
        warn!("OTA: got {} bytes, expected {:?}", total, expected_len);
        return Err(FirmwareUpdateError::Verify);
    }
    Ok(total)
}

#[derive(Debug, Default)]
pub struct HttpOtaUpdater;

impl HttpOtaUpdater {
    pub fn new() -> Self {
        Self
    }
}

impl FirmwareUpdater for HttpOtaUpdater {
    #[cfg(target_os = "espidf")]
    fn perform_update(&mut self, url: &str) -> Result<(), FirmwareUpdateError> {
        use core::time::Duration;
        use esp_idf_svc::http::Method;
        use esp_idf_svc::http::client::{Configuration, EspHttpConnection};

        let conf = Configuration {
            timeout: Some(Duration::from_secs(30)),
            crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
            ..Default::default()
        };
        let mut conn = EspHttpConnection::new(&conf).map_err(|_| FirmwareUpdateError::Download)?;
        conn.initiate_request(Method::Get, url, &[]).map_err(|_| FirmwareUpdateError::Download)?;
        conn.initiate_response().map_err(|_| FirmwareUpdateError::Download)?;
        let status = conn.status();
        if !(200..300).contains(&status) {
            warn!("OTA: HTTP {}", status);
            return Err(FirmwareUpdateError::Download);
        }
        let expected = conn.header("Content-Length").and_then(|v| v.parse::<usize>().ok());

        let mut update = esp_ota::OtaUpdate::begin().map_err(|e| {
            warn!("OTA: begin failed: {:?}", e);
            FirmwareUpdateError::Write
        })?;
        let written = copy_image(
            |buf| conn.read(buf).map_err(|_| FirmwareUpdateError::Download),
            |chunk| update.write(chunk).map_err(|_| FirmwareUpdateError::Write),
            expected,
        )?;
        info!("OTA: {} bytes written", written);

        let mut completed = update.finalize().map_err(|e| {
            warn!("OTA: image rejected: {:?}", e);
            FirmwareUpdateError::Verify
        })?;
        completed.set_as_boot_partition().map_err(|_| FirmwareUpdateError::BootPartition)?;
        info!("OTA: rebooting into new firmware");
        esp_ota::restart();
    }

    #[cfg(not(target_os = "espidf"))]
    fn perform_update(&mut self, url: &str) -> Result<(), FirmwareUpdateError> {
        info!("OTA(sim): would fetch {}", url);
        Err(FirmwareUpdateError::Unsupported)
    }
}

/// Confirm the running image so the bootloader does not roll back.
#[cfg(target_os = "espidf")]
pub fn check_rollback() {
    match esp_ota::mark_app_valid() {
        Ok(()) => info!("OTA: running image marked valid"),
        Err(e) => warn!("OTA: mark_app_valid failed: {:?}", e),
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn check_rollback() {
    info!("OTA(sim): rollback check skipped");
}
