//! FieldLink pump controller firmware: entry point.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  BoardIo          PowerMeter     NvsStore      SystemClock     │
//! │  (Output+Input)   (SensorPort)   (Storage)     (ClockPort)     │
//! │  EthernetLink     WifiLink       MqttBroker    SerialConsole   │
//! │  (LinkPort)       (LinkPort)     (BrokerPort)  (commands)      │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │            PumpController (pure logic)                 │    │
//! │  │  Protection · Schedule/TOU · Mode arbitration          │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  ConnectionManager (Ethernet ⇄ WiFi failover, MQTT session)    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One cooperative loop: console, network, panel inputs, protection tick,
//! telemetry.  The task watchdog is fed at the top of every iteration.

#![deny(unused_must_use)]

use anyhow::{Result, anyhow};
use log::{error, info, warn};

use esp_idf_svc::eth::{BlockingEth, EspEth, EthDriver, SpiEthChipset};
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::delay::FreeRtos;
use esp_idf_svc::hal::gpio::{AnyIOPin, IOPin, OutputPin, PinDriver};
use esp_idf_svc::hal::i2c::{I2cConfig, I2cDriver};
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::hal::prelude::*;
use esp_idf_svc::hal::spi::{SpiDriver, SpiDriverConfig};
use esp_idf_svc::hal::uart::{UartDriver, config::Config as UartConfig};
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{BlockingWifi, EspWifi};

use fieldlink::adapters::console::SerialConsole;
use fieldlink::adapters::device_id::{device_id, ethernet_mac, factory_mac};
use fieldlink::adapters::ethernet::EthernetLink;
use fieldlink::adapters::hardware::BoardIo;
use fieldlink::adapters::log_sink::LogEventSink;
use fieldlink::adapters::mqtt::MqttBroker;
use fieldlink::adapters::nvs::NvsStore;
use fieldlink::adapters::ota::{self, HttpOtaUpdater};
use fieldlink::adapters::power_meter::PowerMeter;
use fieldlink::adapters::time::SystemClock;
use fieldlink::adapters::wifi::{WIFI_NAMESPACE, WifiCredentials, WifiLink};
use fieldlink::app::commands::{Origin, Outcome, SystemAction, parse_console};
use fieldlink::app::ports::{ClockPort, CommandHandler, OutputPort};
use fieldlink::app::service::{Dispatcher, PumpController};
use fieldlink::config::{BrokerConfig, ControllerSettings, EngineTuning, LOOP_DELAY_MS, NO_NETWORK_RESTART_DELAY_MS};
use fieldlink::drivers::digital_inputs::DigitalInputs;
use fieldlink::drivers::modbus::Rs485Bus;
use fieldlink::drivers::watchdog::{WATCHDOG_TIMEOUT_MS, Watchdog};
use fieldlink::pins;
use fieldlink::transport::ConnectionManager;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    let profile = pins::active_profile();
    info!("╔══════════════════════════════════════╗");
    info!("║  FieldLink v{}                    ║", env!("CARGO_PKG_VERSION"));
    info!("║  {:<36}║", profile.hardware_type);
    info!("╚══════════════════════════════════════╝");

    ota::check_rollback();
    let watchdog = Watchdog::subscribe(WATCHDOG_TIMEOUT_MS);

    // ── 2. Settings ───────────────────────────────────────────
    let mut store = NvsStore::open().map_err(|e| anyhow!("NVS: {e}"))?;
    let settings = ControllerSettings::load(&store, &profile.namespaces());
    let mut controller = PumpController::new(profile, settings, EngineTuning::default());

    // ── 3. Peripherals ────────────────────────────────────────
    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let p = peripherals.pins;

    let i2c = I2cDriver::new(
        peripherals.i2c0,
        p.gpio42,
        p.gpio41,
        &I2cConfig::new().baudrate(pins::I2C_FREQ_HZ.Hz()),
    )?;
    let inputs: [AnyIOPin; 8] = [
        p.gpio4.downgrade(),
        p.gpio5.downgrade(),
        p.gpio6.downgrade(),
        p.gpio7.downgrade(),
        p.gpio8.downgrade(),
        p.gpio9.downgrade(),
        p.gpio10.downgrade(),
        p.gpio11.downgrade(),
    ];
    let mut io = BoardIo::new(i2c, pins::TCA9554_ADDR, DigitalInputs::new(inputs)?)
        .map_err(|e| anyhow!("TCA9554 init failed: {e:?}"))?;

    let rs485 = UartDriver::new(
        peripherals.uart1,
        p.gpio17,
        p.gpio18,
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &UartConfig::new().baudrate(pins::RS485_BAUD.Hz()),
    )?;
    let de = PinDriver::output(p.gpio21.downgrade_output())?;
    let mut meter = PowerMeter::new(Rs485Bus::new(rs485, de), pins::METER_SLAVE_ID);

    let uart0 = UartDriver::new(
        peripherals.uart0,
        p.gpio43,
        p.gpio44,
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &UartConfig::new().baudrate(115_200.Hz()),
    )?;
    let mut console = SerialConsole::new(uart0);

    let spi = SpiDriver::new(peripherals.spi2, p.gpio15, p.gpio13, Some(p.gpio14), &SpiDriverConfig::new())?;
    let eth_driver = EthDriver::new_spi(
        spi,
        p.gpio12,
        Some(p.gpio16),
        Some(p.gpio39),
        SpiEthChipset::W5500,
        20.MHz().into(),
        Some(&ethernet_mac()),
        None,
        sysloop.clone(),
    )?;
    let eth = BlockingEth::wrap(EspEth::wrap(eth_driver)?, sysloop.clone())?;

    let wifi = BlockingWifi::wrap(EspWifi::new(peripherals.modem, sysloop.clone(), Some(nvs_partition))?, sysloop)?;

    // ── 4. Identity + network ─────────────────────────────────
    let id = device_id(&factory_mac());
    info!("Device ID: {}", id);

    let mut conn = ConnectionManager::new(
        EthernetLink::new(eth),
        WifiLink::new(wifi, WifiCredentials::load(&store)),
        MqttBroker::new(),
        BrokerConfig::load(&store),
        &id,
    );
    if let Err(e) = conn.boot() {
        error!("Network: {}, restarting in {} ms", e, NO_NETWORK_RESTART_DELAY_MS);
        FreeRtos::delay_ms(NO_NETWORK_RESTART_DELAY_MS);
        esp_idf_svc::hal::reset::restart();
    }

    let mut clock = SystemClock::new();
    clock.start_sync();

    let mut sink = LogEventSink::new();
    let mut updater = HttpOtaUpdater::new();
    controller.boot(&clock, &mut sink);
    if let Err(e) = conn.open_session(clock.now_ms()) {
        warn!("MQTT: initial session failed ({}), retrying in loop", e);
    }

    info!("Entering main loop");

    // ── 5. Main loop ──────────────────────────────────────────
    loop {
        watchdog.feed();
        let mut pending = None;

        if let Some(line) = console.poll_line() {
            match parse_console(&line) {
                Ok(command) => {
                    let mut handler = Dispatcher {
                        controller: &mut controller,
                        io: &mut io,
                        store: &mut store,
                        clock: &clock,
                        sink: &mut sink,
                    };
                    match handler.dispatch(command, Origin::Console) {
                        Outcome::Accepted => console.reply("OK"),
                        Outcome::Ignored(why) => console.reply(&format!("Ignored: {why}")),
                        Outcome::Reply(text) => console.reply(&text),
                        Outcome::System(action) => {
                            console.reply("OK");
                            pending = Some(action);
                        }
                    }
                }
                Err(e) => console.reply(&format!("{e}; type HELP")),
            }
        }

        let now = clock.now_ms();
        conn.maintain(now);
        let mut handler = Dispatcher {
            controller: &mut controller,
            io: &mut io,
            store: &mut store,
            clock: &clock,
            sink: &mut sink,
        };
        if let Some(action) = conn.process_inbound(now, &mut handler, &mut updater) {
            pending = Some(action);
        }

        if let Some(action) = pending {
            run_system_action(action, &mut controller, &mut io, &mut store);
        }

        controller.poll_inputs(now, &mut io, &mut sink);
        controller.tick(&clock, &mut meter, &mut io, &mut sink);

        if conn.is_connected() && controller.telemetry_due(now) {
            let local = clock.local_time();
            let payload = controller.telemetry(now, local.as_ref(), conn.active(), &io).to_json();
            if let Err(e) = conn.publish_telemetry(now, payload.as_bytes()) {
                warn!("Telemetry: {}", e);
            }
        }

        FreeRtos::delay_ms(LOOP_DELAY_MS as u32);
    }
}

/// Halt everything, apply the reset, restart.  Never returns.
fn run_system_action(
    action: SystemAction,
    controller: &mut PumpController,
    io: &mut impl OutputPort,
    store: &mut NvsStore,
) -> ! {
    controller.halt_all(io);
    let erased = match action {
        SystemAction::Reboot => Ok(()),
        SystemAction::WifiReset => store.erase_namespace(WIFI_NAMESPACE),
        SystemAction::FactoryReset => store.erase_all(),
    };
    if let Err(e) = erased {
        warn!("NVS: {:?} erase failed: {}", action, e);
    }
    info!("System: {:?}, restarting", action);
    FreeRtos::delay_ms(200);
    esp_idf_svc::hal::reset::restart();
}
