/*!
    transports to real loops in a `std` + tokio environment

    - [PilBox] drives a serial loop adapter: a box plugged in the loop, taking the controller role on behalf of the host
    - [TcpBridge] chains the controller with software devices over TCP, each frame sent to the next device and received from the previous one

    both spawn a reception and a transmission task on the current tokio runtime and exchange frames with the engine through channels, so the engine stays free of any await point.
*/

/// serial loop adapter
mod pilbox;
/// frames over TCP
mod tcp;

pub use pilbox::PilBox;
pub use tcp::TcpBridge;

use std::io;
use tokio::sync::mpsc::{
    UnboundedSender, UnboundedReceiver,
    error::TryRecvError,
    };

use crate::{
    frame::Frame,
    transport::{Transport, LinkBroken},
    controller::{LoopEngine, Progress, BufferHandler},
    Error,
    };


/**
    run the engine's transaction to its end, sleeping while frames travel the loop

    ```ignore
    engine.stat()?;
    drive(&mut engine).await?;
    ```
*/
pub async fn drive<T: Transport, H: BufferHandler>(engine: &mut LoopEngine<T, H>) -> Result<(), Error> {
    loop {
        match engine.resume(false)? {
            Progress::Running => tokio::task::yield_now().await,
            Progress::Waiting(delay) => tokio::time::sleep(delay).await,
            Progress::Done => return Ok(()),
        }
    }
}

/// engine side of the frame channels, shared by the bridges
struct Channels {
    transmit: UnboundedSender<Frame>,
    receive: UnboundedReceiver<Frame>,
}
impl Channels {
    fn write(&mut self, frame: Frame) -> Result<(), LinkBroken> {
        self.transmit.send(frame).map_err(|_| LinkBroken)
    }
    fn read(&mut self) -> Result<Option<Frame>, LinkBroken> {
        match self.receive.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(LinkBroken),
        }
    }
    fn check_reachable(&self) -> Result<(), LinkBroken> {
        if self.transmit.is_closed()
            {Err(LinkBroken)}
        else
            {Ok(())}
    }
}

fn timed_out(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, std::format!("no answer from {}", what))
}
