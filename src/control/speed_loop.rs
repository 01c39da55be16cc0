// Fixed-period speed control loop for one C620 axis

use embassy_time::{Duration, Instant, TICK_HZ};

use crate::bus::FrameBus;
use crate::c620::MotorRegistry;
use crate::config::{ConfigError, LoopConfig};
use crate::control::vel_pid::{PidParam, VelocityPid};

/// Result of one control tick
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TickReport {
    /// Slot updated by the frame received this tick
    pub updated_slot: Option<usize>,
    /// Measured speed used by the controller [RPM]
    pub actual_rpm: i16,
    /// Controller output (fraction of full-scale current)
    pub output: f32,
    /// Raw current command written to the target slot
    pub raw_current: i16,
    /// Transmit result of the 0x200 and 0x1FF frames
    pub sent: [bool; 2],
}

impl TickReport {
    pub fn all_sent(&self) -> bool {
        self.sent.iter().all(|ok| *ok)
    }
}

/// Speed control loop
///
/// Owns the motor registry and the speed controller for the target slot.
/// Every tick it reads at most one frame, runs the controller on the target
/// slot and transmits the command frames for all eight slots.
pub struct SpeedLoop {
    config: LoopConfig,
    registry: MotorRegistry,
    pid: VelocityPid,
    last_tick: Option<Instant>,
}

impl SpeedLoop {
    /// Create a new control loop
    ///
    /// # Returns
    /// * `Err(ConfigError)` if the configuration is invalid
    pub fn new(config: LoopConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let pid = VelocityPid::new(PidParam::symmetric(config.gain, config.output_limit))
            .with_filter_divisor(config.derivative_filter);

        Ok(Self {
            config,
            registry: MotorRegistry::new(),
            pid,
            last_tick: None,
        })
    }

    /// Run a tick if more than one period has passed since the previous one
    ///
    /// The first call only records `now` as the reference instant.
    ///
    /// # Returns
    /// * `Some(TickReport)` if a tick ran
    /// * `None` if the period has not elapsed yet
    pub fn poll<B: FrameBus>(&mut self, bus: &mut B, now: Instant) -> Option<TickReport> {
        let Some(last) = self.last_tick else {
            self.last_tick = Some(now);
            return None;
        };

        let elapsed = now.checked_duration_since(last)?;
        if elapsed <= self.config.period {
            return None;
        }

        let report = self.tick(bus, elapsed);
        self.last_tick = Some(now);
        Some(report)
    }

    /// Earliest instant at which `poll` runs the next tick
    ///
    /// `None` until the reference instant has been recorded.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.last_tick
            .map(|last| last + self.config.period + Duration::from_ticks(1))
    }

    /// Run one tick unconditionally
    ///
    /// # Arguments
    /// * `bus` - CAN bus
    /// * `dt` - Time since the previous tick
    ///
    /// # Panics
    /// If `dt` is zero
    pub fn tick<B: FrameBus>(&mut self, bus: &mut B, dt: Duration) -> TickReport {
        // 1. 受信フレームを1つだけ取り込む
        let updated_slot = bus
            .try_receive()
            .and_then(|frame| self.registry.update(&frame));

        // 2. 速度PIDで操作量を計算
        let slot = self.config.target_slot;
        let actual_rpm = self.registry.slot(slot).rpm();
        let dt_secs = dt.as_ticks() as f32 / TICK_HZ as f32;
        let output = self
            .pid
            .calc_target(self.config.target_rpm, actual_rpm as f32, dt_secs);

        let motor = self.registry.slot_mut(slot);
        motor.set_current(output);
        let raw_current = motor.raw_current();
        trace!("output: {} (rpm {})", raw_current, actual_rpm);

        // 3. 操作量を送信（失敗しても再送しない）
        let frames = self.registry.to_frames();
        let mut sent = [false; 2];
        for (ok, frame) in sent.iter_mut().zip(frames.iter()) {
            *ok = bus.try_send(frame);
            if !*ok {
                warn!("Failed to write C620 command frame 0x{:03X}", frame.id);
            }
        }

        TickReport {
            updated_slot,
            actual_rpm,
            output,
            raw_current,
            sent,
        }
    }

    /// Change the speed setpoint [RPM]
    pub fn set_target_rpm(&mut self, rpm: f32) {
        self.config.target_rpm = rpm;
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn registry(&self) -> &MotorRegistry {
        &self.registry
    }

    pub fn controller(&self) -> &VelocityPid {
        &self.pid
    }

    pub fn controller_mut(&mut self) -> &mut VelocityPid {
        &mut self.pid
    }

    /// Instant of the last tick (or the reference instant before the first tick)
    pub fn last_tick(&self) -> Option<Instant> {
        self.last_tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can_protocol::{encode_telemetry, RawFrame, Telemetry};
    use crate::control::PidGain;
    use std::collections::VecDeque;
    use std::vec::Vec;

    #[derive(Default)]
    struct MockBus {
        rx: VecDeque<RawFrame>,
        tx: Vec<RawFrame>,
        send_attempts: usize,
        refuse_sends: bool,
    }

    impl FrameBus for MockBus {
        fn try_receive(&mut self) -> Option<RawFrame> {
            self.rx.pop_front()
        }

        fn try_send(&mut self, frame: &RawFrame) -> bool {
            self.send_attempts += 1;
            if self.refuse_sends {
                return false;
            }
            self.tx.push(*frame);
            true
        }
    }

    fn speed_frame(id: u32, rpm: i16) -> RawFrame {
        let telemetry = Telemetry {
            angle: 100,
            rpm,
            measured_current: 0,
            temperature: 40,
        };
        RawFrame::standard_data(id, encode_telemetry(&telemetry))
    }

    fn p_only_config() -> LoopConfig {
        LoopConfig {
            target_rpm: 2000.0,
            output_limit: 0.5,
            gain: PidGain {
                kp: 0.001,
                ki: 0.0,
                kd: 0.0,
            },
            period: Duration::from_millis(10),
            ..LoopConfig::new()
        }
    }

    #[test]
    fn test_speed_step_end_to_end() {
        let mut control = SpeedLoop::new(p_only_config()).unwrap();
        let mut bus = MockBus::default();
        bus.rx.push_back(speed_frame(0x201, 1800));

        let report = control.tick(&mut bus, Duration::from_millis(10));

        assert_eq!(report.updated_slot, Some(0));
        assert_eq!(report.actual_rpm, 1800);
        assert_eq!(report.output, 0.5);
        assert_eq!(report.raw_current, 8192);
        assert!(report.all_sent());

        assert_eq!(bus.tx.len(), 2);
        assert_eq!(bus.tx[0].id, 0x200);
        assert_eq!(bus.tx[0].payload, [0x20, 0x00, 0, 0, 0, 0, 0, 0]);
        assert_eq!(bus.tx[1].id, 0x1FF);
        assert_eq!(bus.tx[1].payload, [0; 8]);
        assert_eq!(control.registry().slot(0).raw_current(), 8192);
    }

    #[test]
    fn test_first_poll_only_latches() {
        let mut control = SpeedLoop::new(p_only_config()).unwrap();
        let mut bus = MockBus::default();
        bus.rx.push_back(speed_frame(0x201, 1800));

        let start = Instant::from_millis(1000);
        assert_eq!(control.poll(&mut bus, start), None);
        assert_eq!(control.last_tick(), Some(start));
        assert_eq!(bus.rx.len(), 1);
        assert_eq!(bus.send_attempts, 0);
    }

    #[test]
    fn test_poll_waits_for_period() {
        let mut control = SpeedLoop::new(p_only_config()).unwrap();
        let mut bus = MockBus::default();

        let start = Instant::from_millis(1000);
        control.poll(&mut bus, start);

        assert_eq!(control.poll(&mut bus, start + Duration::from_millis(5)), None);
        // Exactly one period is not enough; the period must be exceeded
        assert_eq!(control.poll(&mut bus, start + Duration::from_millis(10)), None);
        assert_eq!(bus.send_attempts, 0);

        let deadline = control.next_deadline().unwrap();
        assert!(deadline > start + Duration::from_millis(10));
        assert!(control.poll(&mut bus, deadline).is_some());
        assert_eq!(control.last_tick(), Some(deadline));
        assert_eq!(bus.send_attempts, 2);

        // Next period is measured from the tick just taken
        assert_eq!(control.poll(&mut bus, deadline + Duration::from_millis(10)), None);
    }

    #[test]
    fn test_poll_ignores_clock_going_backwards() {
        let mut control = SpeedLoop::new(p_only_config()).unwrap();
        let mut bus = MockBus::default();

        control.poll(&mut bus, Instant::from_millis(500));
        assert_eq!(control.poll(&mut bus, Instant::from_millis(100)), None);
        assert_eq!(control.last_tick(), Some(Instant::from_millis(500)));
    }

    #[test]
    fn test_next_deadline_before_first_poll() {
        let control = SpeedLoop::new(p_only_config()).unwrap();
        assert_eq!(control.next_deadline(), None);
    }

    #[test]
    fn test_one_frame_per_tick() {
        let mut control = SpeedLoop::new(p_only_config()).unwrap();
        let mut bus = MockBus::default();
        bus.rx.push_back(speed_frame(0x202, 10));
        bus.rx.push_back(speed_frame(0x201, 1990));

        let report = control.tick(&mut bus, Duration::from_millis(10));
        assert_eq!(report.updated_slot, Some(1));
        assert_eq!(report.actual_rpm, 0);
        assert_eq!(bus.rx.len(), 1);

        let report = control.tick(&mut bus, Duration::from_millis(10));
        assert_eq!(report.updated_slot, Some(0));
        assert_eq!(report.actual_rpm, 1990);
        assert!(bus.rx.is_empty());
    }

    #[test]
    fn test_foreign_frame_is_ignored() {
        let mut control = SpeedLoop::new(p_only_config()).unwrap();
        let mut bus = MockBus::default();
        bus.rx.push_back(speed_frame(0x300, 1800));

        let report = control.tick(&mut bus, Duration::from_millis(10));
        assert_eq!(report.updated_slot, None);
        assert_eq!(report.actual_rpm, 0);
        assert!(control.registry().iter().all(|m| m.rpm() == 0));
    }

    #[test]
    fn test_send_failure_does_not_stop_loop() {
        let mut control = SpeedLoop::new(p_only_config()).unwrap();
        let mut bus = MockBus {
            refuse_sends: true,
            ..MockBus::default()
        };

        let report = control.tick(&mut bus, Duration::from_millis(10));
        assert_eq!(report.sent, [false, false]);
        assert!(!report.all_sent());
        // Both frames attempted, nothing retried
        assert_eq!(bus.send_attempts, 2);

        bus.refuse_sends = false;
        let report = control.tick(&mut bus, Duration::from_millis(10));
        assert!(report.all_sent());
        assert_eq!(bus.send_attempts, 4);
        assert_eq!(bus.tx.len(), 2);
    }

    #[test]
    fn test_other_target_slot() {
        let config = LoopConfig {
            target_slot: 5,
            ..p_only_config()
        };
        let mut control = SpeedLoop::new(config).unwrap();
        let mut bus = MockBus::default();
        bus.rx.push_back(speed_frame(0x206, 2100));

        let report = control.tick(&mut bus, Duration::from_millis(10));
        // error -100 -> prop -10000 -> du -10 -> clamped
        assert_eq!(report.output, -0.5);
        assert_eq!(report.raw_current, -8192);

        assert_eq!(bus.tx[0].payload, [0; 8]);
        assert_eq!(bus.tx[1].payload, [0, 0, 0xE0, 0x00, 0, 0, 0, 0]);
        assert_eq!(control.registry().slot(0).raw_current(), 0);
    }

    #[test]
    fn test_command_never_exceeds_full_scale() {
        let config = LoopConfig {
            output_limit: 1.0,
            gain: PidGain {
                kp: 0.0,
                ki: 1.0,
                kd: 0.0,
            },
            ..p_only_config()
        };
        let mut control = SpeedLoop::new(config).unwrap();
        let mut bus = MockBus::default();

        for _ in 0..5 {
            let report = control.tick(&mut bus, Duration::from_millis(10));
            assert_eq!(report.output, 1.0);
            assert_eq!(report.raw_current, 16384);
        }
    }

    #[test]
    fn test_set_target_rpm() {
        let config = LoopConfig {
            gain: PidGain {
                kp: 0.0,
                ki: 0.0001,
                kd: 0.0,
            },
            ..p_only_config()
        };
        let mut control = SpeedLoop::new(config).unwrap();
        let mut bus = MockBus::default();

        control.set_target_rpm(-1000.0);
        let report = control.tick(&mut bus, Duration::from_millis(10));
        assert!((report.output + 0.1).abs() < 1e-6);
        assert_eq!(report.raw_current, -1638);
        assert_eq!(control.config().target_rpm, -1000.0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = LoopConfig {
            target_slot: 9,
            ..LoopConfig::new()
        };
        assert!(matches!(
            SpeedLoop::new(config),
            Err(ConfigError::SlotOutOfRange(9))
        ));
    }
}
