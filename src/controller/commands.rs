use core::fmt::Write;
use log::debug;

use crate::{
    frame::{Frame, message},
    transport::Transport,
    };
use super::{
    Error,
    worker::{LoopEngine, Progress, BufferHandler},
    exchange::Selected,
    protocol::Command,
    stack::Completion,
    registers::ALPHA_RESULT,
    transfer::{ReadMode, Payload},
    };


/// loop transaction a command asks for, kept aside while a background print runs
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    InterfaceClear,
    LoopSize,
    Status,
    DeviceId,
    AccessoryId,
    ClearDevice,
    ClearLoop,
    Input(ReadMode),
    Output {data: Payload, last_is_end: bool},
    OutputStream,
}

/// outcome of admission control
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(super) enum Admission {
    /// the loop is free
    Ready,
    /// a background print holds the loop
    Overlapped,
}

impl<T: Transport, H: BufferHandler> LoopEngine<T, H> {
    /// check whether a new transaction may start now
    pub(super) fn admit(&mut self) -> Result<Admission, Error> {
        if ! self.enabled
            {return Err(Error::BrokenLoop)}
        if self.exchange.status.busy() {
            return if self.printing_in_background()
                {Ok(Admission::Overlapped)}
            else
                {Err(Error::Restricted)}
        }
        self.check_link()?;
        Ok(Admission::Ready)
    }

    /// start a transaction now, or defer it behind a background print
    pub(super) fn request(&mut self, operation: Operation) -> Result<Progress, Error> {
        match self.admit()? {
            Admission::Ready if self.active.is_some() => Err(Error::Restricted),
            Admission::Ready => self.start(operation),
            Admission::Overlapped => {
                if self.deferred.is_some()
                    {return Err(Error::Busy)}
                debug!("deferring {:?}", operation);
                self.deferred = Some(operation);
                Ok(Progress::Running)
            },
        }
    }

    pub(super) fn start(&mut self, operation: Operation) -> Result<Progress, Error> {
        let completion = match operation {
            Operation::InterfaceClear => Completion::InterfaceClear,
            Operation::LoopSize => Completion::LoopSize,
            Operation::Status => Completion::Status,
            Operation::DeviceId => Completion::DeviceId,
            Operation::AccessoryId => Completion::AccessoryId,
            Operation::ClearDevice => Completion::ClearDevice,
            Operation::ClearLoop => Completion::ClearLoop,
            Operation::Input(mode) => Completion::Input(mode),
            Operation::Output {data, last_is_end} => {
                self.exchange.data.load(&data);
                self.exchange.status.set_last_is_end_talk_buf(last_is_end);
                self.exchange.status.set_run_again_talk_buf(false);
                Completion::Output
            },
            Operation::OutputStream => {
                self.exchange.status.set_last_is_end_talk_buf(true);
                self.exchange.status.set_run_again_talk_buf(true);
                self.fill_stream();
                Completion::Output
            },
        };
        self.launch(completion)
    }

    /// clear the loop, making every device unaddressed
    pub fn ifc(&mut self) -> Result<Progress, Error> {
        self.request(Operation::InterfaceClear)
    }
    /// number of devices on the loop, delivered in x
    pub fn nloop(&mut self) -> Result<Progress, Error> {
        self.request(Operation::LoopSize)
    }
    /// status of the selected device, delivered in alpha
    pub fn stat(&mut self) -> Result<Progress, Error> {
        self.request(Operation::Status)
    }
    /// id string of the selected device, delivered in alpha
    pub fn id(&mut self) -> Result<Progress, Error> {
        self.request(Operation::DeviceId)
    }
    /// accessory id of the selected device, delivered in x
    pub fn aid(&mut self) -> Result<Progress, Error> {
        self.request(Operation::AccessoryId)
    }
    /// clear the selected device
    pub fn clrdev(&mut self) -> Result<Progress, Error> {
        self.request(Operation::ClearDevice)
    }
    /// clear all devices
    pub fn clrloop(&mut self) -> Result<Progress, Error> {
        self.request(Operation::ClearLoop)
    }

    /// select the device addressed by generic commands, from x
    pub fn select(&mut self) -> Result<(), Error> {
        self.settings.selected = self.registers.address()?;
        Ok(())
    }
    /// recall the selected device address in x
    pub fn rclsel(&mut self) {
        self.registers.recall(f64::from(self.settings.selected));
    }
    /// set the printer address from x, -1 disables loop printing and 0 restores discovery
    pub fn prtsel(&mut self) -> Result<(), Error> {
        self.settings.printer = self.registers.device_role()?;
        Ok(())
    }
    /// set the mass storage address from x
    pub fn dsksel(&mut self) -> Result<(), Error> {
        self.settings.disk = self.registers.device_role()?;
        Ok(())
    }
    /// device roles are searched on the loop
    pub fn autoio(&mut self) {
        self.settings.manual_io = false;
    }
    /// device roles are taken from the settings only
    pub fn manio(&mut self) {
        self.settings.manual_io = true;
    }

    /**
        print a result when trace or normal printing is on

        the print job is spliced in the running transaction, which then resumes at `resume_step`
    */
    pub(super) fn echo(&mut self, text: &[u8], resume_step: u8) -> Result<Progress, Error> {
        let flags = self.registers.flags;
        if ! ((flags.trace_print || flags.normal_print) && flags.printer_exists)
            {return Ok(Progress::Done)}
        self.print_text(text, true)?;
        self.goto(resume_step);
        if self.insert_pending()? {
            self.send(message::AAU);
            Ok(Progress::Running)
        }
        else
            {Ok(Progress::Done)}
    }
    pub(super) fn echo_number(&mut self, value: u32, resume_step: u8) -> Result<Progress, Error> {
        let mut text = heapless::String::<12>::new();
        write!(text, "{}", value).map_err(|_| Error::Internal)?;
        self.echo(text.as_bytes(), resume_step)
    }

    /// addressing and data request sequence shared by talker queries: AAD, TAD, listen, request, unlisten, UNT
    pub(super) fn query_step(&mut self, step: u8, request: u16) -> Result<Progress, Error> {
        match step {
            0 => self.send_frame(Frame::aad(1)),
            1 => self.send_frame(Frame::tad(self.settings.selected)),
            2 => {
                self.exchange.select(Selected::Data, ALPHA_RESULT);
                self.latch(Command::Listen);
            },
            3 => self.send(request),
            4 => self.latch(Command::Unlisten),
            _ => self.send(message::UNT),
        }
        self.advance();
        Ok(Progress::Running)
    }

    pub(super) fn clear_completion(&mut self, step: u8) -> Result<Progress, Error> {
        match step {
            0 => {
                self.arm_reset();
                self.advance();
                Ok(Progress::Running)
            },
            _ if self.stack.is_empty() => Ok(Progress::Done),
            // the loop was cleared before a transaction, start it now
            _ => {
                self.ret()?;
                self.send(message::AAU);
                Ok(Progress::Running)
            },
        }
    }

    pub(super) fn loop_size_completion(&mut self, step: u8) -> Result<Progress, Error> {
        match step {
            0 => {
                self.send_frame(Frame::aad(1));
                self.advance();
                Ok(Progress::Running)
            },
            1 => {
                let frame = self.core.last_received()
                    .filter(|frame| frame.is_aad())
                    .ok_or(Error::TransmitError)?;
                let count = frame.address().saturating_sub(1);
                debug!("{} devices on the loop", count);
                self.registers.recall(f64::from(count));
                self.echo_number(u32::from(count), 2)
            },
            _ => Ok(Progress::Done),
        }
    }

    pub(super) fn status_completion(&mut self, step: u8) -> Result<Progress, Error> {
        match step {
            0 ..= 5 => self.query_step(step, message::SST),
            6 => {
                let reply = self.exchange.data.filled();
                if reply.is_empty() {
                    self.registers.alpha.clear();
                    return Err(Error::NoResponse)
                }
                self.registers.set_alpha(reply);
                let text = self.registers.alpha.clone();
                self.echo(&text, 7)
            },
            _ => Ok(Progress::Done),
        }
    }

    pub(super) fn id_completion(&mut self, step: u8) -> Result<Progress, Error> {
        match step {
            0 ..= 5 => self.query_step(step, message::SDI),
            6 => {
                let reply = self.exchange.data.filled();
                if reply.is_empty() {
                    self.registers.alpha.clear();
                    return Err(Error::NoResponse)
                }
                let size = reply.iter()
                    .position(|&byte| byte == b'\r' || byte == b'\n')
                    .unwrap_or(reply.len());
                self.registers.set_alpha(&reply[.. size]);
                let text = self.registers.alpha.clone();
                self.echo(&text, 7)
            },
            _ => Ok(Progress::Done),
        }
    }

    pub(super) fn aid_completion(&mut self, step: u8) -> Result<Progress, Error> {
        match step {
            0 => {
                self.send_frame(Frame::aad(1));
                self.advance();
                Ok(Progress::Running)
            },
            1 => {
                self.exchange.select(Selected::Alt, 1);
                self.send_frame(Frame::tad(self.settings.selected));
                self.advance();
                self.call(Completion::AccessoryIdProbe)?;
                Ok(Progress::Running)
            },
            2 => {
                let aid = *self.exchange.alt.filled().first().ok_or(Error::NoResponse)?;
                self.registers.recall(f64::from(aid));
                self.echo_number(u32::from(aid), 3)
            },
            _ => Ok(Progress::Done),
        }
    }

    /// read the accessory id of the device already addressed as talker, into the selected buffer
    pub(super) fn aid_probe_completion(&mut self, step: u8) -> Result<Progress, Error> {
        match step {
            0 => {
                self.exchange.rewind();
                self.latch(Command::Listen);
            },
            1 => self.send(message::SAI),
            2 => self.latch(Command::Unlisten),
            _ => {
                self.send(message::UNT);
                // the caller resumes at UNT handshake
                return self.ret().map(|_| Progress::Running)
            },
        }
        self.advance();
        Ok(Progress::Running)
    }

    pub(super) fn clear_device_completion(&mut self, step: u8) -> Result<Progress, Error> {
        match step {
            0 => self.send_frame(Frame::aad(1)),
            1 => self.send_frame(Frame::lad(self.settings.selected)),
            2 => self.send(message::SDC),
            3 => self.send(message::UNL),
            _ => return Ok(Progress::Done),
        }
        self.advance();
        Ok(Progress::Running)
    }

    pub(super) fn clear_loop_completion(&mut self, step: u8) -> Result<Progress, Error> {
        match step {
            0 => self.send_frame(Frame::aad(1)),
            1 => self.send(message::DCL),
            _ => return Ok(Progress::Done),
        }
        self.advance();
        Ok(Progress::Running)
    }
}
