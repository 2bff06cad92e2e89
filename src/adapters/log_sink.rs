//! [`EventSink`] that writes every [`AppEvent`] to the serial log.

use log::{info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Started { hardware_type, pumps } => {
                info!("START | {} | pumps={}", hardware_type, pumps);
            }
            AppEvent::StateChanged { pump, from, to } => {
                info!("STATE | p{} {} -> {}", pump, from, to);
            }
            AppEvent::FaultLatched { pump, kind, current_a } => {
                warn!("FAULT | p{} {} latched at {:.2} A", pump, kind, current_a);
            }
            AppEvent::FaultCleared { pump, kind } => {
                info!("FAULT | p{} {} cleared", pump, kind);
            }
            AppEvent::ContactorChanged { pump, on } => {
                info!("RELAY | p{} contactor {}", pump, if *on { "ON" } else { "OFF" });
            }
            AppEvent::ScheduleEdge { permitted } => {
                info!("SCHED | {}", if *permitted { "window opened" } else { "window closed" });
            }
            AppEvent::SensorOnline(true) => info!("METER | online"),
            AppEvent::SensorOnline(false) => warn!("METER | offline"),
            AppEvent::ModeChanged(mode) => info!("MODE | {}", mode.as_str()),
        }
    }
}
