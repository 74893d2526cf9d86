use crate::{
    frame::{Frame, message},
    transport::Transport,
    };
use super::{
    Error,
    worker::{LoopEngine, Progress, BufferHandler},
    exchange::{Selected, DATA_SIZE},
    protocol::Command,
    registers::{ALPHA_RESULT, ALPHA_SIZE},
    commands::Operation,
    };


/// longest payload of a single write: the text register and a terminator
pub const OUTPUT_SIZE: usize = ALPHA_SIZE + 2;
/// payload of a write, prepared when the command is issued
pub type Payload = heapless::Vec<u8, OUTPUT_SIZE>;

/// condition ending a read
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Termination {
    /// until the buffer is full or the talker ends
    Full,
    /// until the given character, which is not stored
    Char(u8),
    /// until CR LF, which is not stored
    CrLf,
    /// until an end frame, which is stored
    End,
    /// exactly this number of bytes, unless the talker ends before
    Length(u8),
    /// until the given character or CR LF, whichever comes first
    CharOrCrLf(u8),
}

/// where a read delivers its data
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Alpha,
    /// first byte received, as a number
    X,
    /// every byte goes to the engine's [BufferHandler], x receives the count
    Stream,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReadMode {
    pub termination: Termination,
    pub target: Target,
}
impl ReadMode {
    fn alpha(termination: Termination) -> Self {
        Self {termination, target: Target::Alpha}
    }
}

impl<T: Transport, H: BufferHandler> LoopEngine<T, H> {
    /// read into alpha until the character in x
    pub fn inac(&mut self) -> Result<Progress, Error> {
        let end = self.registers.character()?;
        self.request(Operation::Input(ReadMode::alpha(Termination::Char(end))))
    }
    /// read into alpha until CR LF
    pub fn inacl(&mut self) -> Result<Progress, Error> {
        self.request(Operation::Input(ReadMode::alpha(Termination::CrLf)))
    }
    /// read into alpha until an end frame
    pub fn inae(&mut self) -> Result<Progress, Error> {
        self.request(Operation::Input(ReadMode::alpha(Termination::End)))
    }
    /// read into alpha the number of bytes in x
    pub fn inan(&mut self) -> Result<Progress, Error> {
        let size = self.registers.integer(ALPHA_RESULT as u16)?;
        if size == 0
            {return Err(Error::InvalidData)}
        self.request(Operation::Input(ReadMode::alpha(Termination::Length(size as u8))))
    }
    /// read one byte into x
    pub fn inxb(&mut self) -> Result<Progress, Error> {
        self.request(Operation::Input(ReadMode {termination: Termination::Length(1), target: Target::X}))
    }
    /// read into alpha until the character in x or CR LF
    pub fn inaccl(&mut self) -> Result<Progress, Error> {
        let end = self.registers.character()?;
        self.request(Operation::Input(ReadMode::alpha(Termination::CharOrCrLf(end))))
    }
    /// read everything the selected device sends, handing it to the buffer handler
    pub fn input_stream(&mut self) -> Result<Progress, Error> {
        self.request(Operation::Input(ReadMode {termination: Termination::Full, target: Target::Stream}))
    }

    /// send alpha followed by the character in x
    pub fn outac(&mut self) -> Result<Progress, Error> {
        let end = self.registers.character()?;
        let mut data = self.alpha_payload(self.registers.alpha.len());
        data.push(end).map_err(|_| Error::Internal)?;
        self.request(Operation::Output {data, last_is_end: false})
    }
    /// send alpha followed by CR LF
    pub fn outacl(&mut self) -> Result<Progress, Error> {
        let mut data = self.alpha_payload(self.registers.alpha.len());
        data.extend_from_slice(b"\r\n").map_err(|_| Error::Internal)?;
        self.request(Operation::Output {data, last_is_end: false})
    }
    /// send alpha, its last byte as an end frame
    pub fn outae(&mut self) -> Result<Progress, Error> {
        let data = self.alpha_payload(self.registers.alpha.len());
        self.request(Operation::Output {data, last_is_end: true})
    }
    /// send the number of alpha bytes in x, all of alpha if x is 0 or too large
    pub fn outan(&mut self) -> Result<Progress, Error> {
        let size = usize::from(self.registers.integer(u16::MAX)?);
        let available = self.registers.alpha.len();
        let size = if size == 0 || size > available {available} else {size};
        let data = self.alpha_payload(size);
        self.request(Operation::Output {data, last_is_end: false})
    }
    /// send the byte in x
    pub fn outxb(&mut self) -> Result<Progress, Error> {
        let byte = self.registers.integer(0xff)? as u8;
        let mut data = Payload::new();
        data.push(byte).map_err(|_| Error::Internal)?;
        self.request(Operation::Output {data, last_is_end: false})
    }
    /// send everything the buffer handler provides
    pub fn output_stream(&mut self) -> Result<Progress, Error> {
        self.request(Operation::OutputStream)
    }

    fn alpha_payload(&self, size: usize) -> Payload {
        let alpha = &self.registers.alpha;
        alpha[.. size.min(alpha.len())].iter().copied().collect()
    }

    /// set termination flags and buffer size for a read
    fn prepare_input(&mut self, mode: ReadMode) {
        let status = &mut self.exchange.status;
        status.clear_termination();
        let mut size = ALPHA_RESULT;
        match mode.termination {
            Termination::Full => {},
            Termination::Char(end) => {
                self.exchange.end_char = end;
                status.set_listen_til_char(true);
            },
            Termination::CrLf => status.set_listen_til_crlf(true),
            Termination::End => status.set_listen_til_end(true),
            Termination::Length(length) => size = usize::from(length),
            Termination::CharOrCrLf(end) => {
                self.exchange.end_char = end;
                status.set_listen_til_char(true);
                status.set_listen_til_crlf(true);
            },
        }
        if mode.target == Target::Stream {
            status.set_run_again_listen_buf(true);
            size = DATA_SIZE;
        }
        self.exchange.select(Selected::Data, size);
    }

    pub(super) fn input_completion(&mut self, mode: ReadMode, step: u8) -> Result<Progress, Error> {
        match step {
            2 => {
                self.prepare_input(mode);
                self.latch(Command::Listen);
                self.advance();
                Ok(Progress::Running)
            },
            0 ..= 5 => self.query_step(step, message::SDA),
            6 => self.deliver_input(mode),
            _ => Ok(Progress::Done),
        }
    }

    fn deliver_input(&mut self, mode: ReadMode) -> Result<Progress, Error> {
        let status = self.exchange.status;
        self.exchange.status.clear_termination();
        if mode.target == Target::Stream {
            self.exchange.status.set_run_again_listen_buf(false);
            let total = self.drain_stream();
            if total == 0
                {return Err(Error::NoResponse)}
            self.registers.recall(total as f64);
            return Ok(Progress::Done)
        }

        let reply = self.exchange.data.filled();
        let Some(&first) = reply.first()
            else {return Err(Error::NoResponse)};
        match mode.target {
            Target::X => {
                self.registers.recall(f64::from(first));
                self.echo_number(u32::from(first), 7)
            },
            _ => {
                self.registers.set_alpha(&reply[.. reply.len().min(ALPHA_RESULT)]);
                // termination flags are cleared by the core once their condition is met
                let flags = &mut self.registers.flags;
                flags.input_error = match mode.termination {
                    Termination::Char(_) => status.listen_til_char(),
                    Termination::CrLf => status.listen_til_crlf(),
                    Termination::End => status.listen_til_end(),
                    Termination::CharOrCrLf(_) => status.listen_til_char() && status.listen_til_crlf(),
                    Termination::Full | Termination::Length(_) => false,
                };
                flags.input_eol = matches!(mode.termination, Termination::CharOrCrLf(_))
                    && ! status.listen_til_crlf();
                let text = self.registers.alpha.clone();
                self.echo(&text, 7)
            },
        }
    }

    pub(super) fn output_completion(&mut self, step: u8) -> Result<Progress, Error> {
        match step {
            0 => self.send_frame(Frame::aad(1)),
            1 => self.send_frame(Frame::lad(self.settings.selected)),
            2 => {
                self.exchange.selected = Selected::Data;
                self.latch(Command::Talk);
            },
            3 => self.send(message::UNL),
            _ => return Ok(Progress::Done),
        }
        self.advance();
        Ok(Progress::Running)
    }
}
