use log::{debug, warn};

use crate::frame::{Frame, FrameClass, message};
use super::{
    Error,
    exchange::Exchange,
    };


/// command latched by a completion for the core to execute
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// no bus activity, the handshake is immediate
    Nop,
    /// the controller listens to the next transmission
    Listen,
    /// the controller stops listening
    Unlisten,
    /// the controller talks, sending the selected buffer
    Talk,
    /// send a frame on the loop
    Send(Frame),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    /// a command frame is travelling, RFC follows once it is back
    Command(Frame),
    /// RFC is travelling, the handshake comes with it
    ReadyForCommand,
    /// a ready frame is travelling
    Ready(Frame),
    /// a data request was sent, data frames are coming back until the talker ends
    Receiving(Frame),
    /// NRD was sent to stop the talker
    Interrupting,
    /// a data frame of ours is travelling
    Talking(Frame),
    /// talk buffer is exhausted and waits for a refill
    TalkStalled,
}

/// talker and listeners as set by the addressing frames sent
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Addressing {
    pub talker: Option<u8>,
    /// one bit per listener address
    pub listeners: u32,
}
impl Addressing {
    pub fn is_unaddressed(&self) -> bool {
        self.talker.is_none() && self.listeners == 0
    }
    fn apply(&mut self, frame: Frame) {
        if frame.is(message::IFC) {
            *self = Self::default();
        }
        else if frame.is(message::UNL)
            {self.listeners = 0}
        else if frame.is(message::UNT)
            {self.talker = None}
        else if frame.raw() & 0x7e0 == message::TAD
            {self.talker = Some(frame.address())}
        else if frame.raw() & 0x7e0 == message::LAD
            {self.listeners |= 1 << frame.address()}
    }
}

/**
    frame level state machine of the controller

    the core sends the frames of one latched [Command] and checks what comes back, until the command reaches its handshake. It knows nothing about transactions: sequencing commands is the completions' job.
*/
#[derive(Clone, Debug)]
pub struct LoopCore {
    phase: Phase,
    listening: bool,
    addressing: Addressing,
    /// frame waiting to be written
    outgoing: Option<Frame>,
    handshake: bool,
    /// last ready frame returned, carries the auto address count
    last: Option<Frame>,
}

impl Default for LoopCore {
    fn default() -> Self  {Self::new()}
}

impl LoopCore {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            listening: false,
            addressing: Addressing::default(),
            outgoing: None,
            handshake: false,
            last: None,
        }
    }
    /// forget everything in progress
    pub fn begin(&mut self) {
        *self = Self::new();
    }

    pub fn addressing(&self) -> Addressing  {self.addressing}
    pub fn last_received(&self) -> Option<Frame>  {self.last}
    /// consume the handshake of the last latched command
    pub fn take_handshake(&mut self) -> bool {
        core::mem::take(&mut self.handshake)
    }

    /// start executing a command
    pub fn latch(&mut self, command: Command, exchange: &mut Exchange) {
        debug!("core latch {:?}", command);
        self.handshake = false;
        match command {
            Command::Nop => self.finish(),
            Command::Listen => {
                self.listening = true;
                self.finish();
            },
            Command::Unlisten => {
                self.listening = false;
                self.finish();
            },
            Command::Talk => {
                exchange.rewind();
                self.talk_next(exchange);
            },
            Command::Send(frame) => {
                self.addressing.apply(frame);
                self.phase = match frame.class() {
                    FrameClass::Command => Phase::Command(frame),
                    FrameClass::Ready if is_data_request(frame) => Phase::Receiving(frame),
                    _ => Phase::Ready(frame),
                };
                self.outgoing = Some(frame);
            },
        }
    }

    /// next frame to write, if any
    pub fn process(&mut self, exchange: &mut Exchange) -> Option<Frame> {
        if self.phase == Phase::TalkStalled && ! exchange.status.empty_talk_buf() {
            self.talk_next(exchange);
        }
        self.outgoing.take()
    }

    /// handle a frame returned by the loop
    pub fn receive(&mut self, frame: Frame, exchange: &mut Exchange) -> Result<(), Error> {
        match self.phase {
            Phase::Idle | Phase::TalkStalled => {
                warn!("unexpected frame {:03x} while idle", frame.raw());
            },
            Phase::Command(sent) => {
                if frame != sent
                    {return Err(Error::TransmitError)}
                self.phase = Phase::ReadyForCommand;
                self.outgoing = Some(Frame::from_raw(message::RFC));
            },
            Phase::ReadyForCommand => {
                if ! frame.is(message::RFC)
                    {return Err(Error::TransmitError)}
                self.finish();
            },
            Phase::Ready(sent) => {
                // devices increment the auto address on its way
                if ! (frame == sent || sent.is_aad() && frame.is_aad())
                    {return Err(Error::TransmitError)}
                self.last = Some(frame);
                self.finish();
            },
            Phase::Receiving(request) => {
                if frame.is_data() {
                    if self.listening && exchange.store(frame.data(), frame.is_end()) {
                        self.phase = Phase::Interrupting;
                        self.outgoing = Some(Frame::from_raw(message::NRD));
                    }
                    else {
                        self.outgoing = Some(frame);
                    }
                }
                // the request coming back means nobody talked
                else if frame == request || frame.is(message::ETO) || frame.is(message::ETE)
                    {self.finish()}
                else
                    {return Err(Error::TransmitError)}
            },
            Phase::Interrupting => {
                if ! (frame.is(message::NRD) || frame.is(message::ETO) || frame.is(message::ETE))
                    {return Err(Error::TransmitError)}
                self.finish();
            },
            Phase::Talking(sent) => {
                if frame != sent
                    {return Err(Error::TransmitError)}
                self.talk_next(exchange);
            },
        }
        Ok(())
    }

    fn talk_next(&mut self, exchange: &mut Exchange) {
        match exchange.next() {
            Some((byte, last)) => {
                let frame = Frame::byte(byte, last);
                self.phase = Phase::Talking(frame);
                self.outgoing = Some(frame);
            },
            None if exchange.status.run_again_talk_buf() => {
                exchange.status.set_empty_talk_buf(true);
                self.phase = Phase::TalkStalled;
            },
            None => self.finish(),
        }
    }

    fn finish(&mut self) {
        self.phase = Phase::Idle;
        self.handshake = true;
    }
}

fn is_data_request(frame: Frame) -> bool {
    [message::SDA, message::SST, message::SDI, message::SAI].iter().any(|&raw| frame.is(raw))
}
