//! simulated loop of virtual devices, standing for real hardware in tests
#![allow(dead_code)]

use std::{
    collections::VecDeque,
    vec::Vec,
    };

use hploop::{
    frame::{Frame, message},
    controller::{BufferHandler, exchange::{TransferBuffer, DATA_SIZE}},
    LoopEngine, LoopSettings, Progress, Error, Transport, LinkBroken,
    };


/// a device on the simulated loop, answering status, id, accessory id and data requests
#[derive(Clone, Debug, Default)]
pub struct Device {
    pub aid: u8,
    pub id: Vec<u8>,
    pub status: Vec<u8>,
    /// bytes sent in answer to a data request
    pub data: Vec<u8>,
    /// send the last data byte as an end frame
    pub end_last: bool,
    /// bytes received as listener
    pub received: Vec<u8>,
    /// frames received as listener, to check end frames
    pub received_frames: Vec<Frame>,
    /// number of device clears received
    pub cleared: usize,

    address: Option<u8>,
    talker: bool,
    listener: bool,
    /// bytes left to send while answering a request
    talking: Option<VecDeque<Frame>>,
}

impl Device {
    pub fn new(aid: u8) -> Self {
        Self {aid, ..Default::default()}
    }
    pub fn instrument(data: &[u8]) -> Self {
        Self {
            aid: 0x46,
            id: b"HP3468A\r\n".to_vec(),
            status: vec![0x00],
            data: data.to_vec(),
            ..Default::default()
        }
    }
    /// an 82162A printer with the given status bytes
    pub fn printer(status: [u8; 2]) -> Self {
        Self {
            aid: 0x20,
            id: b"HP82162A\r\n".to_vec(),
            status: status.to_vec(),
            ..Default::default()
        }
    }
    pub fn address(&self) -> Option<u8>  {self.address}

    fn answer(&mut self, bytes: &[u8], end: bool) -> Frame {
        let mut frames: VecDeque<Frame> = bytes.iter().enumerate()
            .map(|(i, &byte)| Frame::byte(byte, end && i == bytes.len() - 1))
            .collect();
        match frames.pop_front() {
            Some(first) => {
                self.talking = Some(frames);
                first
            },
            None => Frame::from_raw(message::ETO),
        }
    }

    /// handle a frame passing through, returns the frame sent to the next device
    pub fn process(&mut self, frame: Frame) -> Frame {
        let raw = frame.raw();
        if let Some(talking) = self.talking.as_mut() {
            if frame.is_data() {
                return match talking.pop_front() {
                    Some(next) => next,
                    None => {
                        self.talking = None;
                        Frame::from_raw(message::ETO)
                    },
                }
            }
            if frame.is(message::NRD) {
                self.talking = None;
                return frame
            }
        }
        if frame.is(message::IFC) {
            self.talker = false;
            self.listener = false;
        }
        else if frame.is(message::AAU)
            {self.address = None}
        else if frame.is_aad() {
            if self.address.is_none() {
                self.address = Some(frame.address());
                return Frame::aad(frame.address() + 1)
            }
        }
        else if raw & 0x7e0 == message::TAD
            {self.talker = self.address == Some(frame.address())}
        else if raw & 0x7e0 == message::LAD {
            if self.address == Some(frame.address()) && frame.address() != 0x1f
                {self.listener = true}
            if frame.is(message::UNL)
                {self.listener = false}
        }
        else if frame.is(message::DCL)
            {self.cleared += 1}
        else if frame.is(message::SDC) {
            if self.listener
                {self.cleared += 1}
        }
        else if self.talker && frame.is(message::SDA) {
            let data = self.data.clone();
            return self.answer(&data, self.end_last)
        }
        else if self.talker && frame.is(message::SST) {
            let status = self.status.clone();
            return self.answer(&status, true)
        }
        else if self.talker && frame.is(message::SDI) {
            let id = self.id.clone();
            return self.answer(&id, true)
        }
        else if self.talker && frame.is(message::SAI) {
            return self.answer(&[self.aid], true)
        }
        else if frame.is_data() && self.listener {
            self.received.push(frame.data());
            self.received_frames.push(frame);
        }
        frame
    }
}

/// loop of virtual devices, every frame written goes through all of them before being readable
#[derive(Debug, Default)]
pub struct SimLoop {
    pub devices: Vec<Device>,
    /// every frame the controller wrote
    pub sent: Vec<Frame>,
    /// the link to the interface is down
    pub broken: bool,
    /// frames never come back
    pub open: bool,
    /// messages lost on the loop
    pub lost: Vec<u16>,
    /// frames returned before the next interface clear comes back
    pub noise: VecDeque<Frame>,
    /// empty reads before each returned frame
    pub delay: u32,
    returned: VecDeque<Frame>,
    waiting: u32,
}

impl SimLoop {
    pub fn new(devices: Vec<Device>) -> Self {
        Self {devices, ..Default::default()}
    }
    /// number of times the given message was written
    pub fn count(&self, raw: u16) -> usize {
        self.sent.iter().filter(|frame| frame.is(raw)).count()
    }
}

impl Transport for SimLoop {
    fn write(&mut self, frame: Frame) -> Result<(), LinkBroken> {
        if self.broken
            {return Err(LinkBroken)}
        self.sent.push(frame);
        if self.open || self.lost.iter().any(|&raw| frame.is(raw))
            {return Ok(())}
        if frame.is(message::IFC) {
            while let Some(noise) = self.noise.pop_front() {
                self.returned.push_back(noise);
            }
        }
        let frame = self.devices.iter_mut().fold(frame, |frame, device| device.process(frame));
        self.returned.push_back(frame);
        self.waiting = self.delay;
        Ok(())
    }
    fn read(&mut self) -> Result<Option<Frame>, LinkBroken> {
        if self.broken
            {return Err(LinkBroken)}
        if self.waiting > 0 {
            self.waiting -= 1;
            return Ok(None)
        }
        Ok(self.returned.pop_front())
    }
    fn check_reachable(&mut self) -> Result<(), LinkBroken> {
        if self.broken  {Err(LinkBroken)}
        else  {Ok(())}
    }
}

/// stream handler collecting received data and providing data to send in chunks
#[derive(Debug, Default)]
pub struct Collector {
    pub received: Vec<u8>,
    pub drains: usize,
    pub chunks: VecDeque<Vec<u8>>,
}
impl BufferHandler for Collector {
    fn drain(&mut self, data: &[u8]) {
        self.received.extend_from_slice(data);
        self.drains += 1;
    }
    fn fill(&mut self, buffer: &mut TransferBuffer<DATA_SIZE>) -> bool {
        let chunk = self.chunks.pop_front().unwrap_or_default();
        buffer.load(&chunk);
        ! self.chunks.is_empty()
    }
}

/// run the engine until its transaction ends
pub fn run<H: BufferHandler>(engine: &mut LoopEngine<SimLoop, H>) -> Result<(), Error> {
    for _ in 0 .. 100_000 {
        if engine.resume(false)? == Progress::Done
            {return Ok(())}
    }
    panic!("transaction never ended");
}

/// engine on a simulated loop, already cleared
pub fn engine(devices: Vec<Device>) -> LoopEngine<SimLoop> {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut engine = LoopEngine::new(SimLoop::new(devices), LoopSettings::default());
    engine.open().expect("failed to open loop");
    run(&mut engine).expect("failed to clear loop");
    engine.transport_mut().sent.clear();
    engine
}

/// select the device at the given address
pub fn select<T: Transport, H: BufferHandler>(engine: &mut LoopEngine<T, H>, address: u8) {
    engine.registers_mut().recall(f64::from(address));
    engine.select().expect("invalid address");
}
