/*!
    loop controller engine

    The central resource is the [LoopEngine] struct which owns the transport, the protocol core, the transfer buffers and the transaction in progress. It never blocks: the host calls [LoopEngine::resume] repeatedly, each call advancing the running transaction by at most one frame exchange and telling when to call again.

    - calculator commands (`nloop`, `stat`, `inac`, `outa` ...) latch a transaction and return at once
    - the worker drives the transaction frame by frame through the [protocol::LoopCore] state machine
    - at each command handshake the transaction's completion step runs and latches the next command, possibly calling nested completions through the [stack::ContinuationStack]
    - printing is a background transaction that foreground commands may be deferred behind, or that is spliced into a foreground transaction to echo its result
*/

/// bus status flags and transfer buffers
pub mod exchange;
/// frame level protocol state machine
pub mod protocol;
/// completion continuations and their bounded stack
pub mod stack;
/// calculator register interface
pub mod registers;
/// worker, transaction driving and reset sequence
mod worker;
/// loop commands and transaction admission
mod commands;
/// data transfer commands
mod transfer;
/// printer discovery and print queue
pub mod printer;


pub use worker::{LoopEngine, Progress, BusState, BufferHandler, NoStream};
pub use transfer::{ReadMode, Termination, Target};
pub use registers::{Registers, Value, Alpha, CalcFlags};

use thiserror::Error;

/// error returned by loop operations
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("operation stopped by user")]
    Stopped,
    #[error("link to the loop interface is broken")]
    BrokenIp,
    #[error("loop is broken, no frame came back")]
    BrokenLoop,
    #[error("no device responded")]
    NoResponse,
    #[error("no printer on the loop")]
    NoPrinter,
    #[error("printer reported an error")]
    PrinterError,
    #[error("frame came back altered")]
    TransmitError,
    #[error("another loop operation is already deferred, retry later")]
    Busy,
    #[error("another loop operation is running")]
    Restricted,
    #[error("completion stack exhausted")]
    StackExhausted,
    #[error("invalid data")]
    InvalidData,
    #[error("invalid type")]
    InvalidType,
    #[error("problem detected on controller side")]
    Internal,
}

/// consequence of an error on the engine state
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Tier {
    /// the link or the loop is unusable, the engine fully resets
    Transport,
    /// protocol state is inconsistent, the engine fully resets
    Protocol,
    /// the addressed device misbehaved, only the transaction ends
    Device,
    /// the request itself is wrong, only the transaction ends
    Usage,
    /// the user stopped the transaction, the engine fully resets
    Cancelled,
}

impl Error {
    pub fn tier(self) -> Tier {
        match self {
            Self::BrokenIp | Self::BrokenLoop => Tier::Transport,
            Self::TransmitError | Self::StackExhausted | Self::Internal => Tier::Protocol,
            Self::NoResponse | Self::NoPrinter | Self::PrinterError => Tier::Device,
            Self::Busy | Self::Restricted | Self::InvalidData | Self::InvalidType => Tier::Usage,
            Self::Stopped => Tier::Cancelled,
        }
    }
    /// the engine state is reset after this error
    pub fn resets(self) -> bool {
        matches!(self.tier(), Tier::Transport | Tier::Protocol | Tier::Cancelled)
    }
    /// the same request may succeed later: once the bus is free, or once the transport is back
    pub fn is_retryable(self) -> bool {
        self == Self::Busy || self.tier() == Tier::Transport
    }
}
