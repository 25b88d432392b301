//! Notification dispatch.
//!
//! The control loop never talks to a push service. It detects threshold
//! crossings, applies their side effects to the control document, and emits
//! events into a bounded channel; a notifier thread (or an external
//! collaborator) drains the channel and does the actual delivery. A full or
//! closed channel drops the event with a warning; transport trouble must
//! never stall the loop.

use crate::settings::Settings;
use crate::state::{Control, Mode, PelletDb};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use ember_hal::ProbeReadings;
use std::thread::JoinHandle;
use tracing::{info, warn};

const CHANNEL_CAPACITY: usize = 32;

/// An event bound for the notification layer.
#[derive(Debug, Clone, PartialEq)]
pub enum NotifyEvent {
    GrillTempAchieved { setpoint: f64 },
    Probe1TempAchieved { setpoint: f64 },
    Probe2TempAchieved { setpoint: f64 },
    TimerExpired,
    PelletLevelLow { hopper_level: f64 },
    GrillError { detail: String },
    MaxTempExceeded { max_temp: f64 },
    StartupTempFailure { startup_temp: f64 },
    GrillWarning { detail: String },
}

impl NotifyEvent {
    /// Wire name understood by the notification back-ends.
    pub fn wire_name(&self) -> &'static str {
        match self {
            NotifyEvent::GrillTempAchieved { .. } => "Grill_Temp_Achieved",
            NotifyEvent::Probe1TempAchieved { .. } => "Probe1_Temp_Achieved",
            NotifyEvent::Probe2TempAchieved { .. } => "Probe2_Temp_Achieved",
            NotifyEvent::TimerExpired => "Timer_Expired",
            NotifyEvent::PelletLevelLow { .. } => "Pellet_Level_Low",
            NotifyEvent::GrillError { .. } => "Grill_Error_00",
            NotifyEvent::MaxTempExceeded { .. } => "Grill_Error_01",
            NotifyEvent::StartupTempFailure { .. } => "Grill_Error_02",
            NotifyEvent::GrillWarning { .. } => "Grill_Warning",
        }
    }

    /// Human-readable message for logs and simple sinks.
    pub fn message(&self) -> String {
        match self {
            NotifyEvent::GrillTempAchieved { setpoint } => {
                format!("Grill setpoint of {setpoint} achieved")
            }
            NotifyEvent::Probe1TempAchieved { setpoint } => {
                format!("Probe 1 setpoint of {setpoint} achieved")
            }
            NotifyEvent::Probe2TempAchieved { setpoint } => {
                format!("Probe 2 setpoint of {setpoint} achieved")
            }
            NotifyEvent::TimerExpired => "Cook timer expired".to_string(),
            NotifyEvent::PelletLevelLow { hopper_level } => {
                format!("Pellet level is down to {hopper_level:.0}%")
            }
            NotifyEvent::GrillError { detail } => format!("Grill error: {detail}"),
            NotifyEvent::MaxTempExceeded { max_temp } => format!(
                "Grill exceeded the maximum temperature limit of {max_temp}; shutting down"
            ),
            NotifyEvent::StartupTempFailure { startup_temp } => format!(
                "Grill temperature dropped below the minimum startup temperature of \
                 {startup_temp}; shutting down to prevent firepot overload"
            ),
            NotifyEvent::GrillWarning { detail } => format!("Grill warning: {detail}"),
        }
    }
}

/// Fire-and-forget sender handed to the control loop.
#[derive(Clone)]
pub struct NotifyEmitter {
    tx: Sender<NotifyEvent>,
}

impl NotifyEmitter {
    pub fn emit(&self, event: NotifyEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!("notification channel full, dropping {}", event.wire_name());
            }
            Err(TrySendError::Disconnected(event)) => {
                warn!(
                    "notification channel closed, dropping {}",
                    event.wire_name()
                );
            }
        }
    }
}

/// Creates the notification channel.
pub fn channel() -> (NotifyEmitter, Receiver<NotifyEvent>) {
    let (tx, rx) = bounded(CHANNEL_CAPACITY);
    (NotifyEmitter { tx }, rx)
}

/// Spawns the in-process sink: logs every event. Push-service transports
/// subscribe to the same channel from their own process.
pub fn spawn_logger(rx: Receiver<NotifyEvent>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("ember-notify".to_string())
        .spawn(move || {
            for event in rx.iter() {
                info!(event = event.wire_name(), "{}", event.message());
            }
        })
        .expect("failed to spawn notifier thread")
}

/// An armed threshold that has crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Threshold {
    Grill,
    Probe1,
    Probe2,
    Timer,
}

/// Detection pass: which armed thresholds have crossed, judged against a
/// control snapshot. Side effects are applied separately by [`acknowledge`]
/// against a fresh document.
pub fn pending(readings: &ProbeReadings, control: &Control, wall_epoch: f64) -> Vec<Threshold> {
    let mut fired = Vec::new();
    if control.notify_req.grill && readings.grill_temp >= control.setpoints.grill {
        fired.push(Threshold::Grill);
    }
    if control.notify_req.probe1 && readings.probe1_temp >= control.setpoints.probe1 {
        fired.push(Threshold::Probe1);
    }
    if control.notify_req.probe2 && readings.probe2_temp >= control.setpoints.probe2 {
        fired.push(Threshold::Probe2);
    }
    if control.notify_req.timer && wall_epoch >= control.timer.end {
        fired.push(Threshold::Timer);
    }
    fired
}

/// Applies the side effects of fired thresholds: clears the request, emits
/// the event, and honours the post-trigger shutdown action while a cook is
/// active.
pub fn acknowledge(control: &mut Control, fired: &[Threshold], emitter: &NotifyEmitter) {
    for threshold in fired {
        match threshold {
            Threshold::Grill => {
                if !control.notify_req.grill {
                    continue;
                }
                control.notify_req.grill = false;
                emitter.emit(NotifyEvent::GrillTempAchieved {
                    setpoint: control.setpoints.grill,
                });
                info!("grill temp of {} achieved", control.setpoints.grill);
            }
            Threshold::Probe1 => {
                if !control.notify_req.probe1 {
                    continue;
                }
                control.notify_req.probe1 = false;
                emitter.emit(NotifyEvent::Probe1TempAchieved {
                    setpoint: control.setpoints.probe1,
                });
                if control.notify_data.p1_shutdown && control.mode.is_active() {
                    control.mode = Mode::Shutdown;
                    control.updated = true;
                    control.notify_data.p1_shutdown = false;
                }
                info!("probe 1 temp of {} achieved", control.setpoints.probe1);
            }
            Threshold::Probe2 => {
                if !control.notify_req.probe2 {
                    continue;
                }
                control.notify_req.probe2 = false;
                emitter.emit(NotifyEvent::Probe2TempAchieved {
                    setpoint: control.setpoints.probe2,
                });
                if control.notify_data.p2_shutdown && control.mode.is_active() {
                    control.mode = Mode::Shutdown;
                    control.updated = true;
                    control.notify_data.p2_shutdown = false;
                }
                info!("probe 2 temp of {} achieved", control.setpoints.probe2);
            }
            Threshold::Timer => {
                if !control.notify_req.timer {
                    continue;
                }
                emitter.emit(NotifyEvent::TimerExpired);
                if control.notify_data.timer_shutdown && control.mode.is_active() {
                    control.mode = Mode::Shutdown;
                    control.updated = true;
                }
                control.notify_req.timer = false;
                control.notify_data.timer_shutdown = false;
                control.timer.start = 0.0;
                control.timer.end = 0.0;
                control.timer.paused = 0.0;
                info!("cook timer expired");
            }
        }
    }
}

/// Emits the low-pellet warning when the hopper is at or under the warning
/// level. Evaluated at mode entry and every 20 minutes.
pub fn check_pellets(settings: &Settings, pelletdb: &PelletDb, emitter: &NotifyEmitter) {
    if settings.pellet_level.warning_enabled
        && pelletdb.current.hopper_level <= settings.pellet_level.warning_level
    {
        emitter.emit(NotifyEvent::PelletLevelLow {
            hopper_level: pelletdb.current.hopper_level,
        });
    }
}
