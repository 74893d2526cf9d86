/*!
    loop frames and their wire encodings

    a frame is the 11 bit unit circulating on the loop: 3 control bits giving its [FrameClass] and 8 bits of payload. Every frame sent by the controller travels through all devices before coming back, possibly modified on its way.
*/

use bilge::prelude::*;

use crate::pack_bilge;


/// class of a frame, given by its 3 control bits
#[bitsize(3)]
#[derive(Copy, Clone, FromBits, Debug, PartialEq, Eq)]
pub enum FrameClass {
    /// data byte
    Data = 0,
    /// data byte with service request
    DataSrq = 1,
    /// last data byte of a transmission
    End = 2,
    /// last data byte with service request
    EndSrq = 3,
    /// bus command, addressing and universal commands
    Command = 4,
    /// ready message, handshakes and auto addressing
    Ready = 5,
    /// identify message
    Identify = 6,
    /// identify message with service request
    IdentifySrq = 7,
}

/// one loop frame
#[bitsize(11)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq, Eq)]
pub struct Frame {
    /// payload byte
    pub data: u8,
    /// frame class
    pub class: FrameClass,
}
pack_bilge!(Frame, u16);

/// raw values of the messages the controller exchanges
pub mod message {
    /// interface clear
    pub const IFC: u16 = 0x490;
    /// ready for command, sent after every command frame
    pub const RFC: u16 = 0x500;
    /// auto address unconfigure
    pub const AAU: u16 = 0x49A;
    /// device clear, all devices
    pub const DCL: u16 = 0x414;
    /// selected device clear, listeners only
    pub const SDC: u16 = 0x404;
    /// unlisten
    pub const UNL: u16 = 0x43F;
    /// untalk
    pub const UNT: u16 = 0x45F;
    /// listen address, low 5 bits carry the address
    pub const LAD: u16 = 0x420;
    /// talk address, low 5 bits carry the address
    pub const TAD: u16 = 0x440;
    /// auto address, low 5 bits carry the address
    pub const AAD: u16 = 0x580;
    /// end of transmission, ok
    pub const ETO: u16 = 0x540;
    /// end of transmission, error
    pub const ETE: u16 = 0x541;
    /// not ready for data, interrupts a talker
    pub const NRD: u16 = 0x542;
    /// send data
    pub const SDA: u16 = 0x560;
    /// send status
    pub const SST: u16 = 0x561;
    /// send device id
    pub const SDI: u16 = 0x562;
    /// send accessory id
    pub const SAI: u16 = 0x563;
    /// bridge adapter: controller on
    pub const CON: u16 = 0x496;
    /// bridge adapter: controller off
    pub const COFF: u16 = 0x497;
}

/// highest loop address a device can take
pub const MAX_ADDRESS: u8 = 30;

impl Frame {
    pub fn from_raw(raw: u16) -> Self {
        Self::from(u11::new(raw & 0x7ff))
    }
    pub fn raw(self) -> u16 {
        u11::from(self).value()
    }

    /// data byte, marked as the last one if `last` is set
    pub fn byte(data: u8, last: bool) -> Self {
        Self::new(data, if last {FrameClass::End} else {FrameClass::Data})
    }

    /// talk address of device `address`
    pub fn tad(address: u8) -> Self  {Self::from_raw(message::TAD | u16::from(address & 0x1f))}
    /// listen address of device `address`
    pub fn lad(address: u8) -> Self  {Self::from_raw(message::LAD | u16::from(address & 0x1f))}
    /// auto address starting at `address`
    pub fn aad(address: u8) -> Self  {Self::from_raw(message::AAD | u16::from(address & 0x1f))}

    pub fn is(self, raw: u16) -> bool  {self.raw() == raw}

    /// data or end frame, regardless of service request
    pub fn is_data(self) -> bool {
        matches!(self.class(), FrameClass::Data | FrameClass::DataSrq | FrameClass::End | FrameClass::EndSrq)
    }
    /// end frame, regardless of service request
    pub fn is_end(self) -> bool {
        matches!(self.class(), FrameClass::End | FrameClass::EndSrq)
    }
    /// auto address frame
    pub fn is_aad(self) -> bool {
        self.raw() & 0x7e0 == message::AAD
    }
    /// low 5 bits, the address carried by addressing frames
    pub fn address(self) -> u8 {
        self.data() & 0x1f
    }

    /// round trip timeout category of this frame when sent by the controller
    pub fn timeout_class(self) -> TimeoutClass {
        match self.class() {
            FrameClass::Identify | FrameClass::IdentifySrq => TimeoutClass::Identify,
            FrameClass::Command if self.is(message::IFC) => TimeoutClass::InterfaceClear,
            FrameClass::Command => TimeoutClass::Command,
            _ => TimeoutClass::Data,
        }
    }
}

/// categories of frame round trip time, see [crate::settings::Timeouts]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TimeoutClass {
    Identify,
    InterfaceClear,
    Command,
    Data,
}



/**
    encoder for the serial bridge adapter byte stream

    each frame is split in a high byte `001hhhh0` carrying the 4 upper bits and a low byte `1lllllll` carrying the 7 lower bits. The high byte is only sent when it differs from the previous frame's.
*/
#[derive(Clone, Debug, Default)]
pub struct PilBoxEncoder {
    last: Option<u16>,
}
impl PilBoxEncoder {
    pub fn new() -> Self  {Self::default()}
    /// encode one frame, returns the buffer and the number of used bytes in it
    pub fn encode(&mut self, frame: Frame) -> ([u8; 2], usize) {
        let raw = frame.raw();
        let high = raw & 0x780;
        let mut buffer = [0; 2];
        let mut size = 0;
        if self.last != Some(high) {
            self.last = Some(high);
            buffer[size] = (high >> 6) as u8 | 0x20;
            size += 1;
        }
        buffer[size] = (raw & 0x7f) as u8 | 0x80;
        size += 1;
        (buffer, size)
    }
}

/// decoder for the serial bridge adapter byte stream, counterpart of [PilBoxEncoder]
#[derive(Clone, Debug, Default)]
pub struct PilBoxDecoder {
    high: u16,
}
impl PilBoxDecoder {
    pub fn new() -> Self  {Self::default()}
    /// feed one received byte, returns a frame once its low byte arrived
    pub fn push(&mut self, byte: u8) -> Option<Frame> {
        // sync byte from the adapter
        if byte == 0x0d
            {None}
        else if byte & 0xe1 == 0x20 {
            self.high = u16::from(byte & 0x1e) << 6;
            None
        }
        else if byte & 0x80 != 0
            {Some(Frame::from_raw(self.high | u16::from(byte & 0x7f)))}
        else
            {None}
    }
}
