/*!
    HP-IL loop controller engine for calculator emulators.

    The controller sends 11 bit frames around a ring of devices (printers, disk drives, instruments), every frame travelling through all devices before coming back. This crate implements the controller side: addressing, status and identity queries, data transfers, printer discovery and print jobs, all driven by a cooperative worker the host polls.

    - [frame] defines the frame format and the serial adapter byte stream
    - [controller] is the engine itself, built around [LoopEngine]
    - [transport] is the seam to the physical interface
    - [settings] holds the persisted loop settings and timing configuration
    - `bridge` (feature `bridge`) provides serial adapter and TCP transports on tokio
*/
#![no_std]

#[cfg(feature = "std")]
extern crate std;

mod utils;
pub mod frame;
pub mod settings;
pub mod transport;
pub mod controller;
#[cfg(feature = "bridge")]
pub mod bridge;

pub use controller::{LoopEngine, Progress, Error};
pub use frame::{Frame, FrameClass};
pub use settings::{LoopSettings, DeviceRole, SettingsStore, Timeouts};
pub use transport::{Transport, LinkBroken};
