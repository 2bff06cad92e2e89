//! GPIO / peripheral assignments for the FieldLink 8DI/8DO PoE board,
//! plus the per-product wiring of pumps onto its outputs and inputs.
//!
//! Single source of truth: every driver references this module rather than
//! hard-coding pin numbers or channel indices.

// ---------------------------------------------------------------------------
// RS-485 power meter (Modbus RTU)
// ---------------------------------------------------------------------------

pub const RS485_RX_GPIO: i32 = 18;
pub const RS485_TX_GPIO: i32 = 17;
/// Transceiver driver-enable: HIGH while transmitting.
pub const RS485_DE_GPIO: i32 = 21;
pub const RS485_BAUD: u32 = 9_600;
/// Modbus slave address of the meter.
pub const METER_SLAVE_ID: u8 = 1;

// ---------------------------------------------------------------------------
// W5500 Ethernet (SPI)
// ---------------------------------------------------------------------------

pub const ETH_CS_GPIO: i32 = 16;
pub const ETH_SCLK_GPIO: i32 = 15;
pub const ETH_MOSI_GPIO: i32 = 13;
pub const ETH_MISO_GPIO: i32 = 14;
pub const ETH_INT_GPIO: i32 = 12;
pub const ETH_RST_GPIO: i32 = 39;

// ---------------------------------------------------------------------------
// I2C bus: TCA9554 output expander driving the 8 relay outputs
// ---------------------------------------------------------------------------

pub const I2C_SDA_GPIO: i32 = 42;
pub const I2C_SCL_GPIO: i32 = 41;
pub const I2C_FREQ_HZ: u32 = 100_000;
pub const TCA9554_ADDR: u8 = 0x20;

// ---------------------------------------------------------------------------
// Opto-isolated digital inputs DI0..DI7 (active-low, internal pull-up)
// ---------------------------------------------------------------------------

pub const DI_GPIOS: [i32; 8] = [4, 5, 6, 7, 8, 9, 10, 11];

// ---------------------------------------------------------------------------
// Pump wiring
// ---------------------------------------------------------------------------

/// Which phase currents a pump's protection looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseSelect {
    /// Three-phase motor: the largest of L1..L3.
    AllPhases,
    /// Single-phase motor on the given line (0 = L1).
    Phase(usize),
}

impl PhaseSelect {
    pub fn current(self, currents: &[f32; 3]) -> f32 {
        match self {
            Self::AllPhases => currents.iter().copied().fold(0.0, f32::max),
            Self::Phase(i) => currents.get(i).copied().unwrap_or(0.0),
        }
    }
}

/// Where one pump lives on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpWiring {
    /// Output channel energising the contactor coil.
    pub contactor: u8,
    /// Output channel driving the fault alarm / beacon.
    pub alarm: u8,
    /// Input bit of the contactor auxiliary contact.
    pub feedback_bit: u8,
    pub phase: PhaseSelect,
    /// NVS namespace holding this pump's protection settings.
    pub namespace: &'static str,
}

/// Local control panel (single-pump product only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelWiring {
    /// Normally-open start push button.
    pub start_bit: u8,
    /// Normally-closed stop push button; the input drops when pressed.
    pub stop_bit: u8,
    /// Local/remote selector; input inactive = REMOTE.
    pub mode_bit: u8,
    pub run_led: u8,
    pub fault_led: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardProfile {
    /// Reported as `hardware_type` in telemetry.
    pub hardware_type: &'static str,
    pub pumps: &'static [PumpWiring],
    pub panel: Option<PanelWiring>,
    /// Bitmap of outputs owned by the application; the rest are free for
    /// manual `DOxON` / `DOxOFF` commands.
    pub used_outputs: u8,
}

pub const SINGLE_PUMP: BoardProfile = BoardProfile {
    hardware_type: "PUMP_ESP32S3",
    pumps: &[PumpWiring {
        contactor: 0,
        alarm: 4,
        feedback_bit: 3,
        phase: PhaseSelect::AllPhases,
        namespace: "prot_p1",
    }],
    panel: Some(PanelWiring { start_bit: 0, stop_bit: 1, mode_bit: 2, run_led: 1, fault_led: 2 }),
    used_outputs: 0x17,
};

pub const TRIPLE_PUMP: BoardProfile = BoardProfile {
    hardware_type: "EVE_ESP32S3",
    pumps: &[
        PumpWiring { contactor: 0, alarm: 4, feedback_bit: 0, phase: PhaseSelect::Phase(0), namespace: "prot_p1" },
        PumpWiring { contactor: 1, alarm: 5, feedback_bit: 1, phase: PhaseSelect::Phase(1), namespace: "prot_p2" },
        PumpWiring { contactor: 2, alarm: 6, feedback_bit: 2, phase: PhaseSelect::Phase(2), namespace: "prot_p3" },
    ],
    panel: None,
    used_outputs: 0x77,
};

/// Profile compiled into this build.
pub const fn active_profile() -> &'static BoardProfile {
    if cfg!(feature = "triple-pump") { &TRIPLE_PUMP } else { &SINGLE_PUMP }
}

impl BoardProfile {
    pub fn namespaces(&self) -> Vec<&'static str> {
        self.pumps.iter().map(|p| p.namespace).collect()
    }
}
