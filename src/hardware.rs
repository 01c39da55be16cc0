//! ハードウェア初期化モジュール
//!
//! クロックとFDCANの初期化、および制御ループ用のCANバス実装をまとめます。

use core::task::Poll;

use embassy_futures::poll_once;
use embassy_stm32::{bind_interrupts, can, peripherals, Config, Peri};

use c620_speed_control::{FrameBus, RawFrame};

// CANの割り込みをバインド
bind_interrupts!(pub struct Irqs {
    FDCAN1_IT0 => can::IT0InterruptHandler<peripherals::FDCAN1>;
    FDCAN1_IT1 => can::IT1InterruptHandler<peripherals::FDCAN1>;
});

/// RCCクロック設定を初期化
///
/// HSI → PLL（÷4 × 85 ÷ 2）で170MHz生成
pub fn create_clock_config() -> Config {
    let mut config = Config::default();
    {
        use embassy_stm32::rcc::mux::{ClockMux, Fdcansel};
        use embassy_stm32::rcc::{Pll, PllMul, PllPreDiv, PllQDiv, PllRDiv, PllSource, Sysclk};

        config.rcc.hsi = true;
        config.rcc.pll = Some(Pll {
            source: PllSource::HSI,
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL85,
            divp: None,
            divq: Some(PllQDiv::DIV2), // FDCANクロック用
            divr: Some(PllRDiv::DIV2),
        });
        config.rcc.sys = Sysclk::PLL1_R;

        let mut clock_mux = ClockMux::default();
        clock_mux.fdcansel = Fdcansel::PLL1_Q;
        config.rcc.mux = clock_mux;
    }
    config
}

/// FDCAN1を起動して制御ループ用のバスを返す
///
/// PA11=RX、PA12=TX。C620のフレームは標準IDのみなので標準フィルタで全受信。
pub fn init_can(
    fdcan: Peri<'static, peripherals::FDCAN1>,
    rx_pin: Peri<'static, peripherals::PA11>,
    tx_pin: Peri<'static, peripherals::PA12>,
    bitrate: u32,
) -> FdcanBus {
    let mut configurator = can::CanConfigurator::new(fdcan, rx_pin, tx_pin, Irqs);
    configurator.properties().set_standard_filter(
        can::filter::StandardFilterSlot::_0,
        can::filter::StandardFilter::accept_all_into_fifo0(),
    );
    configurator.set_bitrate(bitrate);
    let can = configurator.start(can::OperatingMode::NormalOperationMode);
    info!("FDCAN1 started at {} bps", bitrate);

    let (tx, rx, _properties) = can.split();
    FdcanBus { tx, rx }
}

/// FDCANの送受信ハーフを束ねたノンブロッキングバス
///
/// 受信フレームはFDCANのFIFOに溜まり、制御タスクからのみ取り出される。
pub struct FdcanBus {
    tx: can::CanTx<'static>,
    rx: can::CanRx<'static>,
}

impl FrameBus for FdcanBus {
    fn try_receive(&mut self) -> Option<RawFrame> {
        match poll_once(self.rx.read()) {
            Poll::Ready(Ok(envelope)) => Some(RawFrame::from_frame(&envelope.frame)),
            Poll::Ready(Err(e)) => {
                warn!("CAN RX error: {:?}", e);
                None
            }
            Poll::Pending => None,
        }
    }

    fn try_send(&mut self, frame: &RawFrame) -> bool {
        let Some(frame) = frame.to_frame::<can::frame::Frame>() else {
            error!("Unencodable CAN frame 0x{:X}", frame.id);
            return false;
        };
        // 送信バッファに空きがあれば最初のポーリングで完了する
        poll_once(self.tx.write(&frame)).is_ready()
    }
}
