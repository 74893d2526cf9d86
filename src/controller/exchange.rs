use bilge::prelude::*;


/// capacity of the main transfer buffer
pub const DATA_SIZE: usize = 256;
/// capacity of the alternate buffer, used for identity and status replies
pub const ALT_SIZE: usize = 4;

/// bus transaction and buffer status flags
#[bitsize(16)]
#[derive(Copy, Clone, FromBits, DebugBits, DefaultBits, PartialEq, Eq)]
pub struct BusStatus {
    /// a command has been latched and not yet dispatched to the core
    pub cmd_new: bool,
    /// the core is running a command
    pub cmd_run: bool,
    /// the last command reached its handshake
    pub cmd_hshk: bool,
    /// listen buffer is full
    pub full_listen_buf: bool,
    /// talk buffer is exhausted
    pub empty_talk_buf: bool,
    /// drain the listen buffer each time it is full and go on receiving
    pub run_again_listen_buf: bool,
    /// refill the talk buffer each time it is exhausted and go on sending
    pub run_again_talk_buf: bool,
    /// send the last byte of the talk buffer as an end frame
    pub last_is_end_talk_buf: bool,
    /// stop receiving on the end character, cleared once found
    pub listen_til_char: bool,
    /// stop receiving on CR LF, cleared once found
    pub listen_til_crlf: bool,
    /// stop receiving on an end frame, cleared once found
    pub listen_til_end: bool,
    reserved: u5,
}
impl BusStatus {
    /// a transaction holds the bus
    pub fn busy(&self) -> bool {
        self.cmd_new() || self.cmd_run()
    }
    pub fn clear_buffer_flags(&mut self) {
        self.set_full_listen_buf(false);
        self.set_empty_talk_buf(false);
    }
    pub fn clear_termination(&mut self) {
        self.set_listen_til_char(false);
        self.set_listen_til_crlf(false);
        self.set_listen_til_end(false);
    }
}


/// fixed capacity byte buffer with one cursor, shared by talk and listen operations
#[derive(Clone, Debug)]
pub struct TransferBuffer<const N: usize> {
    bytes: [u8; N],
    /// declared size, bytes after it are not used
    size: usize,
    /// bytes received so far, or bytes sent so far
    cursor: usize,
}
impl<const N: usize> Default for TransferBuffer<N> {
    fn default() -> Self {
        Self {bytes: [0; N], size: N, cursor: 0}
    }
}
impl<const N: usize> TransferBuffer<N> {
    pub fn size(&self) -> usize  {self.size}
    /// bytes received, or bytes already sent
    pub fn len(&self) -> usize  {self.cursor}
    pub fn is_empty(&self) -> bool  {self.cursor == 0}
    /// receiving reached the declared size
    pub fn is_full(&self) -> bool  {self.cursor >= self.size}
    /// bytes left to send
    pub fn remaining(&self) -> usize  {self.size.saturating_sub(self.cursor)}

    /// prepare for receiving at most `size` bytes
    pub fn declare(&mut self, size: usize) {
        self.size = size.min(N);
        self.cursor = 0;
    }
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }
    /// prepare for sending the given bytes, truncated to capacity
    pub fn load(&mut self, data: &[u8]) {
        let size = data.len().min(N);
        self.bytes[.. size].copy_from_slice(&data[.. size]);
        self.size = size;
        self.cursor = 0;
    }
    /// bytes received so far
    pub fn filled(&self) -> &[u8] {
        &self.bytes[.. self.cursor]
    }
    /// store a received byte, false if the declared size is reached
    pub fn push(&mut self, byte: u8) -> bool {
        if self.is_full()
            {return false}
        self.bytes[self.cursor] = byte;
        self.cursor += 1;
        true
    }
    /// remove the last received byte
    pub fn pop(&mut self) -> Option<u8> {
        if self.cursor == 0
            {return None}
        self.cursor -= 1;
        Some(self.bytes[self.cursor])
    }
    /// next byte to send
    pub fn next(&mut self) -> Option<u8> {
        if self.cursor >= self.size
            {return None}
        self.cursor += 1;
        Some(self.bytes[self.cursor - 1])
    }
}

/// buffer used by the running transfer
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Selected {
    #[default]
    Data,
    Alt,
}

/// transfer state shared between the worker and the core: status flags, buffers and termination character
#[derive(Clone, Debug, Default)]
pub struct Exchange {
    pub status: BusStatus,
    pub data: TransferBuffer<DATA_SIZE>,
    pub alt: TransferBuffer<ALT_SIZE>,
    pub selected: Selected,
    /// character ending a read with [BusStatus::listen_til_char]
    pub end_char: u8,
}

const CR: u8 = 0x0d;
const LF: u8 = 0x0a;

impl Exchange {
    /// use the given buffer for the next transfer, declaring its size
    pub fn select(&mut self, selected: Selected, size: usize) {
        self.selected = selected;
        match selected {
            Selected::Data => self.data.declare(size),
            Selected::Alt => self.alt.declare(size),
        }
    }
    /// bytes received in the selected buffer
    pub fn filled(&self) -> &[u8] {
        match self.selected {
            Selected::Data => self.data.filled(),
            Selected::Alt => self.alt.filled(),
        }
    }
    pub fn rewind(&mut self) {
        match self.selected {
            Selected::Data => self.data.rewind(),
            Selected::Alt => self.alt.rewind(),
        }
    }
    /// next byte to talk and whether it is the last one of the transmission
    pub fn next(&mut self) -> Option<(u8, bool)> {
        let (byte, remaining) = match self.selected {
            Selected::Data => (self.data.next()?, self.data.remaining()),
            Selected::Alt => (self.alt.next()?, self.alt.remaining()),
        };
        let last = remaining == 0
            && self.status.last_is_end_talk_buf()
            && ! self.status.run_again_talk_buf();
        Some((byte, last))
    }

    /**
        store a byte received while listening, returns true when the talker must be stopped

        termination characters are not stored, a CR preceding a terminating LF is removed
    */
    pub fn store(&mut self, byte: u8, end: bool) -> bool {
        if self.status.listen_til_char() && byte == self.end_char {
            self.status.set_listen_til_char(false);
            return true
        }
        if self.status.listen_til_crlf() && byte == LF && self.filled().last() == Some(&CR) {
            match self.selected {
                Selected::Data => self.data.pop(),
                Selected::Alt => self.alt.pop(),
            };
            self.status.set_listen_til_crlf(false);
            return true
        }
        let (stored, full) = match self.selected {
            Selected::Data => (self.data.push(byte), self.data.is_full()),
            Selected::Alt => (self.alt.push(byte), self.alt.is_full()),
        };
        if end && self.status.listen_til_end() {
            self.status.set_listen_til_end(false);
            return true
        }
        if full || ! stored {
            self.status.set_full_listen_buf(true);
            return ! self.status.run_again_listen_buf()
        }
        false
    }
}
