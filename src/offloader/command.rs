//! One submitted unit of work (§4.6): the driver-facing `Command` plus the
//! completion callback the offloader itself invokes once the driver
//! reports it done. Grounded on `xkrt_stream_instruction_t`
//! (`src/driver/stream.cc`): a fixed-size slot carrying a type tag and a
//! callback, pushed into `ready` and moved to `pending` on launch.

use crate::driver::Command;

pub type Callback = Box<dyn FnOnce() + Send>;

pub struct Slot {
    pub command: Command,
    pub callback: Callback,
}

impl Slot {
    pub fn new(command: Command, callback: Callback) -> Slot {
        Slot { command, callback }
    }
}
