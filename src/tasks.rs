//! タスクモジュール

pub mod speed_control;

pub use speed_control::speed_control_task;
