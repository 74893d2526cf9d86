use super::{
    Error,
    transfer::ReadMode,
    printer::PrintCursor,
    };


/// maximum number of suspended continuations
pub const STACK_DEPTH: usize = 10;

/// step function of a transaction, resumed at each handshake
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Completion {
    /// interface clear sequence
    InterfaceClear,
    /// count devices on the loop
    LoopSize,
    /// read the selected device status
    Status,
    /// read the selected device id
    DeviceId,
    /// read the selected device accessory id
    AccessoryId,
    ClearDevice,
    ClearLoop,
    /// read data from the selected device
    Input(ReadMode),
    /// send the data buffer to the selected device
    Output,
    /// accessory id exchange shared by other completions
    AccessoryIdProbe,
    /// print the queued records
    Print(PrintCursor),
}

/// a completion and the step to resume it at
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Continuation {
    pub completion: Completion,
    pub step: u8,
}
impl Continuation {
    pub fn new(completion: Completion) -> Self {
        Self {completion, step: 0}
    }
}

/**
    suspended continuations of the running transaction

    calling a nested completion suspends the current one, returning resumes the last suspended. Overflowing or underflowing the stack fails without touching it.
*/
#[derive(Clone, Debug, Default)]
pub struct ContinuationStack {
    frames: heapless::Vec<Continuation, STACK_DEPTH>,
}

impl ContinuationStack {
    pub fn new() -> Self  {Self::default()}
    pub fn depth(&self) -> usize  {self.frames.len()}
    pub fn is_empty(&self) -> bool  {self.frames.is_empty()}
    /// the outermost continuation, which started the transaction
    pub fn root(&self) -> Option<&Continuation>  {self.frames.first()}
    pub fn iter(&self) -> impl Iterator<Item=&Continuation>  {self.frames.iter()}
    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// suspend `current` and make `next` current, starting at its first step
    pub fn call(&mut self, current: &mut Continuation, next: Completion) -> Result<(), Error> {
        self.frames.push(*current).map_err(|_| Error::StackExhausted)?;
        *current = Continuation::new(next);
        Ok(())
    }
    /// resume the last suspended continuation in `current`
    pub fn ret(&mut self, current: &mut Continuation) -> Result<(), Error> {
        *current = self.frames.pop().ok_or(Error::StackExhausted)?;
        Ok(())
    }
}
