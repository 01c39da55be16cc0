// Speed control for C620-driven motors

pub mod speed_loop;
pub mod vel_pid;

// Re-export main types for easier access
pub use speed_loop::{SpeedLoop, TickReport};
pub use vel_pid::{PidGain, PidParam, VelocityPid};
