//! Board peripherals: relay expander, input bank, panel buttons, RS-485
//! Modbus master and the task watchdog.

pub mod button;
pub mod digital_inputs;
pub mod io_expander;
pub mod modbus;
pub mod watchdog;
