//! 速度制御タスク
//!
//! 制御周期ごとにCAN受信 → 速度PID → 電流指令送信を実行します。

use embassy_time::{Instant, Timer};

use c620_speed_control::SpeedLoop;

use crate::hardware::FdcanBus;

/// ログ出力間隔 [tick]（10ms周期で1秒ごと）
const LOG_INTERVAL_TICKS: u32 = 100;

/// 速度制御タスク
///
/// 次の制御時刻までスリープし、起床後に1周期分の処理を行う。
#[embassy_executor::task]
pub async fn speed_control_task(mut control: SpeedLoop, mut bus: FdcanBus) {
    let config = *control.config();
    info!(
        "Speed control task started: target={}RPM, limit=±{}, slot={}, period={}us",
        config.target_rpm,
        config.output_limit,
        config.target_slot,
        config.period.as_micros()
    );
    info!(
        "  PID gains: Kp={}, Ki={}, Kd={}",
        config.gain.kp, config.gain.ki, config.gain.kd
    );

    let mut log_counter: u32 = 0;
    // ログ間隔内で送信に失敗した周期数
    let mut tx_fail_ticks: u32 = 0;

    loop {
        // 基準時刻が未設定なら即座にpollして記録させる
        if let Some(deadline) = control.next_deadline() {
            Timer::at(deadline).await;
        }

        let Some(report) = control.poll(&mut bus, Instant::now()) else {
            continue;
        };

        if !report.all_sent() {
            tx_fail_ticks += 1;
        }

        // デバッグログ（低頻度）
        log_counter += 1;
        if log_counter >= LOG_INTERVAL_TICKS {
            log_counter = 0;
            let motor = control.registry().slot(config.target_slot);
            debug!(
                "[Speed] {}/{} RPM, output={} (raw {}), current={}, temp={}C",
                report.actual_rpm,
                config.target_rpm,
                report.output,
                report.raw_current,
                motor.measured_current(),
                motor.temperature()
            );
            if tx_fail_ticks > 0 {
                warn!("[Speed] TX failed in {}/{} ticks", tx_fail_ticks, LOG_INTERVAL_TICKS);
                tx_fail_ticks = 0;
            }
        }
    }
}
