//! NVS-backed [`StoragePort`].
//!
//! Every value is stored as a blob under `(namespace, key)`; the typed layer
//! in [`ConfigStore`](crate::app::ports::ConfigStore) handles encoding.
//! ESP-IDF commits are atomic per `nvs_commit()`, so a power cut mid-write
//! leaves the previous value in place.
//!
//! Namespaces in use: `prot_p1`..`prot_p3`, `schedule`, `ruraflex`, `mqtt`.
//! Off-target the store is an in-memory map.

use crate::app::ports::{StorageError, StoragePort};
use log::{info, warn};

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

/// NVS namespace and key names are limited to 15 bytes plus NUL.
const NAME_MAX: usize = 15;

pub struct NvsStore {
    #[cfg(not(target_os = "espidf"))]
    map: HashMap<(String, String), Vec<u8>>,
}

/// NUL-terminated copy of an NVS name, truncated to the IDF limit.
#[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
fn c_name(name: &str) -> [u8; NAME_MAX + 1] {
    let mut buf = [0u8; NAME_MAX + 1];
    let len = name.len().min(NAME_MAX);
    buf[..len].copy_from_slice(&name.as_bytes()[..len]);
    buf
}

impl NvsStore {
    /// Initialise the default NVS partition, erasing it if the layout is
    /// stale (first boot, or after an IDF version bump).
    pub fn open() -> Result<Self, StorageError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: called once from the main task before any other NVS user.
            let mut ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES || ret == ESP_ERR_NVS_NEW_VERSION_FOUND {
                warn!("NVS: partition stale, erasing");
                ret = unsafe { nvs_flash_erase() };
                if ret == ESP_OK {
                    ret = unsafe { nvs_flash_init() };
                }
            }
            if ret != ESP_OK {
                return Err(StorageError::IoError);
            }
            info!("NVS: ready");
            Ok(Self {})
        }

        #[cfg(not(target_os = "espidf"))]
        {
            info!("NVS(sim): in-memory store");
            Ok(Self { map: HashMap::new() })
        }
    }

    #[cfg(target_os = "espidf")]
    fn with_handle<T>(namespace: &str, write: bool, f: impl FnOnce(nvs_handle_t) -> Result<T, esp_err_t>) -> Result<T, esp_err_t> {
        let ns = c_name(namespace);
        let mode = if write { nvs_open_mode_t_NVS_READWRITE } else { nvs_open_mode_t_NVS_READONLY };
        let mut handle: nvs_handle_t = 0;
        // SAFETY: ns is NUL-terminated and outlives the call.
        let ret = unsafe { nvs_open(ns.as_ptr() as *const _, mode, &mut handle) };
        if ret != ESP_OK {
            return Err(ret);
        }
        let result = f(handle);
        // SAFETY: handle was opened above.
        unsafe { nvs_close(handle) };
        result
    }

    #[cfg(target_os = "espidf")]
    fn commit(handle: nvs_handle_t, ret: esp_err_t) -> Result<(), esp_err_t> {
        if ret != ESP_OK {
            return Err(ret);
        }
        // SAFETY: handle is open for writing.
        match unsafe { nvs_commit(handle) } {
            ESP_OK => Ok(()),
            e => Err(e),
        }
    }

    /// Drop every key in one namespace (e.g. stored WiFi credentials).
    pub fn erase_namespace(&mut self, namespace: &str) -> Result<(), StorageError> {
        info!("NVS: erasing namespace '{}'", namespace);

        #[cfg(target_os = "espidf")]
        {
            // SAFETY: handle is open for writing inside the closure.
            Self::with_handle(namespace, true, |h| Self::commit(h, unsafe { nvs_erase_all(h) })).or_else(|e| {
                if e == ESP_ERR_NVS_NOT_FOUND { Ok(()) } else { Err(StorageError::IoError) }
            })
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.map.retain(|(ns, _), _| ns != namespace);
            Ok(())
        }
    }

    /// Factory reset: wipe the whole partition.
    pub fn erase_all(&mut self) -> Result<(), StorageError> {
        warn!("NVS: erasing all settings");

        #[cfg(target_os = "espidf")]
        {
            // SAFETY: no handles are held across this call.
            let ret = unsafe { nvs_flash_erase() };
            if ret != ESP_OK {
                return Err(StorageError::IoError);
            }
            match unsafe { nvs_flash_init() } {
                ESP_OK => Ok(()),
                _ => Err(StorageError::IoError),
            }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.map.clear();
            Ok(())
        }
    }
}

impl StoragePort for NvsStore {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        #[cfg(target_os = "espidf")]
        {
            let k = c_name(key);
            let result = Self::with_handle(namespace, false, |h| {
                let mut size = buf.len();
                // SAFETY: buf is valid for `size` bytes.
                match unsafe { nvs_get_blob(h, k.as_ptr() as *const _, buf.as_mut_ptr() as *mut _, &mut size) } {
                    ESP_OK => Ok(size),
                    e => Err(e),
                }
            });
            result.map_err(|e| match e {
                ESP_ERR_NVS_NOT_FOUND => StorageError::NotFound,
                _ => StorageError::IoError,
            })
        }

        #[cfg(not(target_os = "espidf"))]
        {
            let data = self.map.get(&(namespace.to_owned(), key.to_owned())).ok_or(StorageError::NotFound)?;
            let len = data.len().min(buf.len());
            buf[..len].copy_from_slice(&data[..len]);
            Ok(len)
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        #[cfg(target_os = "espidf")]
        {
            let k = c_name(key);
            // SAFETY: data is valid for its length; handle open for writing.
            let result = Self::with_handle(namespace, true, |h| {
                Self::commit(h, unsafe { nvs_set_blob(h, k.as_ptr() as *const _, data.as_ptr() as *const _, data.len()) })
            });
            result.map_err(|e| {
                warn!("NVS: write {}/{} failed ({})", namespace, key, e);
                if e == ESP_ERR_NVS_NOT_ENOUGH_SPACE { StorageError::Full } else { StorageError::IoError }
            })
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.map.insert((namespace.to_owned(), key.to_owned()), data.to_vec());
            Ok(())
        }
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        #[cfg(target_os = "espidf")]
        {
            let k = c_name(key);
            let result = Self::with_handle(namespace, true, |h| {
                // SAFETY: k is NUL-terminated.
                let ret = unsafe { nvs_erase_key(h, k.as_ptr() as *const _) };
                Self::commit(h, if ret == ESP_ERR_NVS_NOT_FOUND { ESP_OK } else { ret })
            });
            match result {
                Ok(()) | Err(ESP_ERR_NVS_NOT_FOUND) => Ok(()),
                Err(_) => Err(StorageError::IoError),
            }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.map.remove(&(namespace.to_owned(), key.to_owned()));
            Ok(())
        }
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        #[cfg(target_os = "espidf")]
        {
            let k = c_name(key);
            // SAFETY: k is NUL-terminated; the type out-param may be null.
            Self::with_handle(namespace, false, |h| Ok(unsafe { nvs_find_key(h, k.as_ptr() as *const _, core::ptr::null_mut()) } == ESP_OK))
                .unwrap_or(false)
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.map.contains_key(&(namespace.to_owned(), key.to_owned()))
        }
    }
}
