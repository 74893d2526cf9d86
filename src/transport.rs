/*!
    link between the engine and the physical loop interface
*/

use thiserror::Error;
use crate::frame::Frame;


/// the link to the loop interface cannot be used anymore
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
#[error("link to the loop interface is broken")]
pub struct LinkBroken;

/**
    frame level access to the loop interface

    implementations must never block: the engine polls [Transport::read] and gives the host back the control between two polls.
*/
pub trait Transport {
    /// send a frame on the loop
    fn write(&mut self, frame: Frame) -> Result<(), LinkBroken>;
    /// take a frame returned by the loop if one arrived, `None` if nothing is available yet
    fn read(&mut self) -> Result<Option<Frame>, LinkBroken>;
    /// quick check that the interface is still connected
    fn check_reachable(&mut self) -> Result<(), LinkBroken>  {Ok(())}
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn write(&mut self, frame: Frame) -> Result<(), LinkBroken>  {(**self).write(frame)}
    fn read(&mut self) -> Result<Option<Frame>, LinkBroken>  {(**self).read()}
    fn check_reachable(&mut self) -> Result<(), LinkBroken>  {(**self).check_reachable()}
}
