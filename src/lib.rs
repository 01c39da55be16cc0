//! C620 / M3508 速度制御
//!
//! CAN上のC620ドライバからテレメトリを受信し、速度PIDで電流指令を計算して送り返す
//! 固定周期の制御ループです。ハードウェアに依存しない部分をライブラリとしてまとめ、
//! ホスト上でテストできるようにしています。

#![cfg_attr(not(test), no_std)]

mod fmt;

pub mod bus;
pub mod c620;
pub mod can_protocol;
pub mod config;
pub mod control;

pub use bus::FrameBus;
pub use c620::{MotorRegistry, MotorState};
pub use can_protocol::RawFrame;
pub use config::{ConfigError, LoopConfig};
pub use control::{SpeedLoop, TickReport, VelocityPid};
