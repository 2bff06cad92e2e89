//! Task watchdog (TWDT).
//!
//! Subscribes the main task and panics (→ reset) if the loop stops feeding
//! it.  Every blocking step in the loop is bounded well below the timeout.

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::{ESP_OK, esp_task_wdt_add, esp_task_wdt_config_t, esp_task_wdt_reconfigure, esp_task_wdt_reset};

/// Longest bounded block is the WiFi bring-up (30 s); keep clear of it.
pub const WATCHDOG_TIMEOUT_MS: u32 = 45_000;

pub struct Watchdog {
    subscribed: bool,
    #[cfg(not(target_os = "espidf"))]
    feeds: core::cell::Cell<u32>,
}

impl Watchdog {
    pub fn subscribe(timeout_ms: u32) -> Self {
        #[cfg(target_os = "espidf")]
        {
            let cfg = esp_task_wdt_config_t { timeout_ms, idle_core_mask: 0, trigger_panic: true };
            // SAFETY: plain IDF calls on the current task; cfg outlives the call.
            let subscribed = unsafe {
                let ret = esp_task_wdt_reconfigure(&cfg);
                if ret != ESP_OK {
                    log::warn!("Watchdog: reconfigure returned {}", ret);
                }
                esp_task_wdt_add(core::ptr::null_mut()) == ESP_OK
            };
            if subscribed {
                log::info!("Watchdog: armed, {} ms", timeout_ms);
            } else {
                log::warn!("Watchdog: subscribe failed, running unguarded");
            }
            Self { subscribed }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            log::info!("Watchdog(sim): {} ms, not enforced", timeout_ms);
            Self { subscribed: true, feeds: core::cell::Cell::new(0) }
        }
    }

    pub fn is_armed(&self) -> bool {
        self.subscribed
    }

    pub fn feed(&self) {
        if !self.subscribed {
            return;
        }
        #[cfg(target_os = "espidf")]
        // SAFETY: the current task is subscribed.
        unsafe {
            esp_task_wdt_reset();
        }
        #[cfg(not(target_os = "espidf"))]
        self.feeds.set(self.feeds.get().wrapping_add(1));
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn feeds(&self) -> u32 {
        self.feeds.get()
    }
}
