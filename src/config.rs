//! 速度制御ループの設定パラメータ
//!
//! 起動時に [`LoopConfig`] を組み立て、制御ループへ渡します。

use embassy_time::Duration;

use crate::can_protocol::SLOT_COUNT;
use crate::control::PidGain;

/// 目標回転数 [RPM]（デフォルト値）
pub const DEFAULT_TARGET_RPM: f32 = 2000.0;

/// 出力リミット（最大電流指令に対する割合）（デフォルト値）
pub const DEFAULT_OUTPUT_LIMIT: f32 = 0.5;

/// PIDゲイン（デフォルト値、実機でチューニングすること）
pub const DEFAULT_KP: f32 = 0.0;
pub const DEFAULT_KI: f32 = 0.0;
pub const DEFAULT_KD: f32 = 0.0;

/// 制御周期 [ms]（デフォルト値）
pub const DEFAULT_CONTROL_PERIOD_MS: u64 = 10;

/// 制御対象スロット（ID 0x201のモーター）（デフォルト値）
pub const DEFAULT_TARGET_SLOT: usize = 0;

/// 微分項ローパスフィルタの除数 N（filtered += (d - filtered) / N）（デフォルト値）
pub const DEFAULT_DERIVATIVE_FILTER: f32 = 8.0;

/// CAN設定
pub mod can {
    /// CANビットレート（1Mbps、C620の固定値）
    pub const DEFAULT_BITRATE: u32 = 1_000_000;
}

/// 設定検証エラー
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// 制御周期が0
    ZeroPeriod,

    /// 制御対象スロットが範囲外（0-7）
    SlotOutOfRange(usize),

    /// 出力リミットが (0, 1] の範囲外
    InvalidOutputLimit,

    /// フィルタ除数が1未満または非有限
    InvalidFilter,
}

/// 速度制御ループの起動時設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopConfig {
    /// 目標回転数 [RPM]
    pub target_rpm: f32,

    /// 出力リミット（±output_limit、最大電流に対する割合）
    pub output_limit: f32,

    /// PIDゲイン
    pub gain: PidGain,

    /// 制御周期
    pub period: Duration,

    /// 制御対象スロット
    pub target_slot: usize,

    /// 微分項フィルタ除数
    pub derivative_filter: f32,
}

impl LoopConfig {
    /// デフォルト設定を生成
    pub const fn new() -> Self {
        Self {
            target_rpm: DEFAULT_TARGET_RPM,
            output_limit: DEFAULT_OUTPUT_LIMIT,
            gain: PidGain {
                kp: DEFAULT_KP,
                ki: DEFAULT_KI,
                kd: DEFAULT_KD,
            },
            period: Duration::from_millis(DEFAULT_CONTROL_PERIOD_MS),
            target_slot: DEFAULT_TARGET_SLOT,
            derivative_filter: DEFAULT_DERIVATIVE_FILTER,
        }
    }

    /// 設定値を検証
    ///
    /// # Returns
    /// * `Ok(())` - 有効な設定
    /// * `Err(ConfigError)` - 最初に見つかった不正値
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.period.as_ticks() == 0 {
            return Err(ConfigError::ZeroPeriod);
        }
        if self.target_slot >= SLOT_COUNT {
            return Err(ConfigError::SlotOutOfRange(self.target_slot));
        }
        // NaNも弾くため否定形で比較
        if !(self.output_limit > 0.0 && self.output_limit <= 1.0) {
            return Err(ConfigError::InvalidOutputLimit);
        }
        if !(self.derivative_filter >= 1.0 && self.derivative_filter.is_finite()) {
            return Err(ConfigError::InvalidFilter);
        }
        Ok(())
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::new()
    }
}
