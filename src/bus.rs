// Non-blocking CAN bus interface used by the control loop

use crate::can_protocol::RawFrame;

/// CAN bus access polled from the control loop
///
/// Both calls must return immediately. Implementations backed by an
/// interrupt-driven peripheral queue received frames and hand them out here,
/// so loop state is only touched from the loop's own context.
pub trait FrameBus {
    /// Take one received frame, if any
    fn try_receive(&mut self) -> Option<RawFrame>;

    /// Queue a frame for transmission
    ///
    /// # Returns
    /// `true` if the frame was accepted by the transmitter
    fn try_send(&mut self, frame: &RawFrame) -> bool;
}

impl<B: FrameBus + ?Sized> FrameBus for &mut B {
    fn try_receive(&mut self) -> Option<RawFrame> {
        (**self).try_receive()
    }

    fn try_send(&mut self, frame: &RawFrame) -> bool {
        (**self).try_send(frame)
    }
}
