//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter       | Implements              | Connects to                 |
//! |---------------|-------------------------|-----------------------------|
//! | `hardware`    | OutputPort, InputPort   | TCA9554 relays, DI GPIOs    |
//! | `power_meter` | SensorPort              | Modbus RTU meter on RS-485  |
//! | `time`        | ClockPort               | esp_timer + SNTP            |
//! | `nvs`         | StoragePort             | NVS / in-memory store       |
//! | `ethernet`    | LinkPort (wired)        | W5500 over SPI              |
//! | `wifi`        | LinkPort (wireless)     | ESP-IDF WiFi STA            |
//! | `mqtt`        | BrokerPort              | ESP-IDF MQTT client         |
//! | `ota`         | FirmwareUpdater         | HTTP(S) + OTA partitions    |
//! | `log_sink`    | EventSink               | Serial log output           |
//! | `console`     | (command source)        | UART0 line input            |
//! | `device_id`   | -                       | eFuse factory MAC           |

pub mod console;
pub mod device_id;
pub mod ethernet;
pub mod hardware;
pub mod log_sink;
pub mod mqtt;
pub mod nvs;
pub mod ota;
pub mod power_meter;
pub mod time;
pub mod wifi;
