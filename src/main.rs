#![no_std]
#![no_main]

mod fmt;
mod hardware;
mod tasks;

#[cfg(not(feature = "defmt"))]
use panic_halt as _;
#[cfg(feature = "defmt")]
use {defmt_rtt as _, panic_probe as _};

use embassy_executor::Spawner;

use c620_speed_control::config;
use c620_speed_control::{LoopConfig, SpeedLoop};

use tasks::speed_control_task;

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // ハードウェア初期化
    let p = embassy_stm32::init(hardware::create_clock_config());

    info!("═══════════════════════════════════════════════");
    info!("   C620 / M3508 Speed Control • STM32G431VB");
    info!("═══════════════════════════════════════════════");

    // 起動時設定（実機に合わせてここでゲインを与える）
    let loop_config = LoopConfig::new();

    // 設定が不正なら起動しない
    let control = SpeedLoop::new(loop_config).unwrap();

    // CAN初期化（PA11=RX, PA12=TX, 1Mbps）
    let bus = hardware::init_can(p.FDCAN1, p.PA11, p.PA12, config::can::DEFAULT_BITRATE);

    info!("setup");

    // 速度制御タスクを起動
    spawner.spawn(speed_control_task(control, bus)).unwrap();
}
