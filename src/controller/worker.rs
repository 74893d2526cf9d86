use core::time::Duration;
use log::{debug, info, trace, warn};

use crate::{
    frame::{Frame, message},
    settings::{LoopSettings, Timeouts},
    transport::Transport,
    };
use super::{
    Error,
    exchange::{Exchange, TransferBuffer, DATA_SIZE},
    protocol::{LoopCore, Command, Addressing},
    stack::{Completion, Continuation, ContinuationStack},
    registers::Registers,
    printer::Printer,
    commands::Operation,
    };


/// interface clear retries before the loop is declared broken
pub const IFC_RETRIES: u8 = 5;
/// unexpected frames tolerated while waiting for an interface clear to come back
pub const IFC_NOISE: u8 = 5;

/// outcome of one worker call
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Progress {
    /// call again right away
    Running,
    /// a frame is travelling the loop, call again after this delay
    Waiting(Duration),
    /// the transaction is over
    Done,
}

/// externally visible state of the engine
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BusState {
    Idle,
    /// a command is latched and not yet sent
    CommandDispatch,
    /// the core runs a command
    Running,
    /// a frame is travelling the loop
    AwaitingReply,
    /// a command reached its handshake and its completion is due
    HandshakeReached,
    /// the last transaction failed and the engine was reset
    Faulted,
}

/**
    host side of streamed transfers

    a streamed read drains the listen buffer each time it is full, a streamed write refills the talk buffer each time it is exhausted.
*/
pub trait BufferHandler {
    /// consume received data, the buffer is rewound afterwards
    fn drain(&mut self, data: &[u8]);
    /// load the next chunk to send, returns false once this chunk is the last
    fn fill(&mut self, buffer: &mut TransferBuffer<DATA_SIZE>) -> bool;
}

/// handler for engines without streamed transfers
#[derive(Copy, Clone, Debug, Default)]
pub struct NoStream;
impl BufferHandler for NoStream {
    fn drain(&mut self, _data: &[u8]) {}
    fn fill(&mut self, buffer: &mut TransferBuffer<DATA_SIZE>) -> bool {
        buffer.load(&[]);
        false
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ResetPhase {
    Idle,
    /// interface clear sent, waiting for it to come back
    AwaitClear,
    /// ready for command sent, waiting for it to come back
    AwaitRestore,
}

#[derive(Copy, Clone, Debug)]
struct Reset {
    phase: ResetPhase,
    /// retries left
    countdown: u8,
    /// unexpected frames still tolerated
    noise: u8,
}
impl Reset {
    fn idle() -> Self {
        Self {phase: ResetPhase::Idle, countdown: IFC_RETRIES, noise: IFC_NOISE}
    }
    fn retries(&self) -> u32 {
        u32::from(IFC_RETRIES - self.countdown)
    }
}

/// a frame is travelling, number of read attempts left before giving up
#[derive(Copy, Clone, Debug)]
struct PendingRead {
    remaining: u32,
}

/**
    the loop controller

    owns every piece of state of the loop: transport, protocol core, transfer buffers, running transaction, print queue and settings. Loop commands (see its other methods) start a transaction and return at once, [Self::resume] then drives it.

    ```ignore
    let mut engine = LoopEngine::new(transport, LoopSettings::default());
    engine.open()?;
    engine.nloop()?;
    loop {
        match engine.resume(false)? {
            Progress::Running => continue,
            Progress::Waiting(delay) => sleep(delay),
            Progress::Done => break,
        }
    }
    println!("{:?} devices", engine.registers().x);
    ```
*/
pub struct LoopEngine<T, H = NoStream> {
    transport: T,
    handler: H,
    timeouts: Timeouts,
    pub(super) settings: LoopSettings,
    pub(super) registers: Registers,
    pub(super) core: LoopCore,
    pub(super) exchange: Exchange,
    latched: Command,
    read: Option<PendingRead>,
    reset: Reset,
    /// continuation resumed at the next handshake
    pub(super) active: Option<Continuation>,
    pub(super) stack: ContinuationStack,
    /// completion waiting to be spliced into the running transaction
    pub(super) pending: Option<Completion>,
    /// request waiting for the background transaction to end
    pub(super) deferred: Option<Operation>,
    pub(super) printer: Printer,
    /// bytes delivered to the handler by the running streamed read
    pub(super) streamed: usize,
    /// the transport is open
    pub(super) enabled: bool,
    /// interface clear succeeded
    bus_enabled: bool,
    faulted: bool,
}

impl<T: Transport> LoopEngine<T> {
    pub fn new(transport: T, settings: LoopSettings) -> Self {
        Self {
            transport,
            handler: NoStream,
            timeouts: Timeouts::default(),
            settings,
            registers: Registers::default(),
            core: LoopCore::new(),
            exchange: Exchange::default(),
            latched: Command::Nop,
            read: None,
            reset: Reset::idle(),
            active: None,
            stack: ContinuationStack::new(),
            pending: None,
            deferred: None,
            printer: Printer::default(),
            streamed: 0,
            enabled: false,
            bus_enabled: false,
            faulted: false,
        }
    }
}

impl<T: Transport, H: BufferHandler> LoopEngine<T, H> {
    /// replace the handler of streamed transfers
    pub fn with_handler<H2: BufferHandler>(self, handler: H2) -> LoopEngine<T, H2> {
        LoopEngine {
            transport: self.transport,
            handler,
            timeouts: self.timeouts,
            settings: self.settings,
            registers: self.registers,
            core: self.core,
            exchange: self.exchange,
            latched: self.latched,
            read: self.read,
            reset: self.reset,
            active: self.active,
            stack: self.stack,
            pending: self.pending,
            deferred: self.deferred,
            printer: self.printer,
            streamed: self.streamed,
            enabled: self.enabled,
            bus_enabled: self.bus_enabled,
            faulted: self.faulted,
        }
    }
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn registers(&self) -> &Registers  {&self.registers}
    pub fn registers_mut(&mut self) -> &mut Registers  {&mut self.registers}
    pub fn settings(&self) -> &LoopSettings  {&self.settings}
    pub fn settings_mut(&mut self) -> &mut LoopSettings  {&mut self.settings}
    pub fn handler(&self) -> &H  {&self.handler}
    pub fn handler_mut(&mut self) -> &mut H  {&mut self.handler}
    pub fn transport_mut(&mut self) -> &mut T  {&mut self.transport}
    /// give the transport back, to release it properly
    pub fn into_transport(self) -> T  {self.transport}
    pub fn addressing(&self) -> Addressing  {self.core.addressing()}
    /// the last interface clear succeeded
    pub fn is_bus_enabled(&self) -> bool  {self.bus_enabled}
    /// number of completions currently suspended
    pub fn depth(&self) -> usize  {self.stack.depth()}
    /// print records waiting to be sent
    pub fn queued_prints(&self) -> usize  {self.printer.queued()}

    pub fn state(&self) -> BusState {
        let status = self.exchange.status;
        if self.faulted
            {BusState::Faulted}
        else if status.cmd_new()
            {BusState::CommandDispatch}
        else if self.read.is_some()
            {BusState::AwaitingReply}
        else if status.cmd_run()
            {BusState::Running}
        else if self.active.is_some()
            {BusState::HandshakeReached}
        else
            {BusState::Idle}
    }
    /// no transaction is running
    pub fn is_idle(&self) -> bool {
        ! self.exchange.status.busy() && self.read.is_none() && self.active.is_none()
    }

    /**
        open the loop: the transport is enabled and an interface clear is started

        drive it with [Self::resume] like any other transaction
    */
    pub fn open(&mut self) -> Result<Progress, Error> {
        self.transport.check_reachable().map_err(|_| Error::BrokenIp)?;
        self.restart();
        self.enabled = true;
        info!("loop opened");
        self.launch(Completion::InterfaceClear)
    }
    /// close the loop, anything in progress is dropped
    pub fn close(&mut self) {
        self.restart();
        self.enabled = false;
        info!("loop closed");
    }

    /**
        advance the running transaction

        `stop` aborts it, which fully resets the engine. Errors end the transaction, and for transport or protocol errors also reset the engine before being returned.
    */
    pub fn resume(&mut self, stop: bool) -> Result<Progress, Error> {
        let result = if stop && ! self.is_idle()
            {Err(Error::Stopped)}
        else
            {self.pump()};
        match result {
            Ok(progress) => {
                self.thresholds();
                if progress == Progress::Done {
                    self.finish();
                    if let Some(operation) = self.deferred.take() {
                        debug!("starting deferred {:?}", operation);
                        return self.start(operation).inspect_err(|&error| self.fail(error));
                    }
                }
                Ok(progress)
            },
            Err(error) => {
                self.fail(error);
                Err(error)
            },
        }
    }

    fn pump(&mut self) -> Result<Progress, Error> {
        if self.exchange.status.cmd_new() {
            self.exchange.status.set_cmd_new(false);
            self.exchange.status.clear_buffer_flags();
            if self.latched == Command::Nop {
                return self.complete()
            }
            self.exchange.status.set_cmd_run(true);
            self.core.latch(self.latched, &mut self.exchange);
            self.transmit()?;
        }
        else if let Some(read) = self.read.take() {
            match self.transport.read().map_err(|_| Error::BrokenIp)? {
                Some(frame) => {
                    trace!("receive {:03x}", frame.raw());
                    if self.reset.phase == ResetPhase::Idle
                        {self.core.receive(frame, &mut self.exchange)?}
                    else
                        {self.receive_reset(frame, read)?}
                    self.transmit()?;
                },
                None if read.remaining > 0 => {
                    self.read = Some(PendingRead {remaining: read.remaining - 1});
                    return Ok(Progress::Waiting(self.timeouts.poll))
                },
                None => self.no_reply()?,
            }
        }
        else if self.exchange.status.cmd_run() {
            // a stalled talk may resume
            self.transmit()?;
        }
        else if self.active.is_none() {
            return Ok(Progress::Done)
        }

        if self.core.take_handshake() {
            self.exchange.status.set_cmd_run(false);
            self.exchange.status.set_cmd_hshk(true);
            return self.complete()
        }
        Ok(Progress::Running)
    }

    /// write every frame the core has to send, arming the read of its return
    fn transmit(&mut self) -> Result<(), Error> {
        while let Some(frame) = self.core.process(&mut self.exchange) {
            trace!("send {:03x}", frame.raw());
            self.transport.write(frame).map_err(|_| Error::BrokenIp)?;
            let timeout = self.timeouts.of(frame.timeout_class(), self.reset.retries());
            self.read = Some(PendingRead {remaining: self.timeouts.attempts(timeout)});
        }
        Ok(())
    }

    fn receive_reset(&mut self, frame: Frame, read: PendingRead) -> Result<(), Error> {
        match self.reset.phase {
            ResetPhase::AwaitClear if frame.is(message::IFC) => {
                self.core.receive(frame, &mut self.exchange)?;
                self.reset.phase = ResetPhase::AwaitRestore;
            },
            ResetPhase::AwaitRestore if frame.is(message::RFC) => {
                self.core.receive(frame, &mut self.exchange)?;
                self.reset = Reset::idle();
                self.bus_enabled = true;
                info!("loop cleared");
            },
            _ if self.reset.noise > 0 => {
                self.reset.noise -= 1;
                debug!("ignoring frame {:03x} during interface clear", frame.raw());
                self.read = Some(read);
            },
            _ if self.reset.countdown > 0 => {
                self.reset.countdown -= 1;
                warn!("too much noise during interface clear, {} retries left", self.reset.countdown);
                self.retry_clear();
            },
            _ => return Err(Error::BrokenLoop),
        }
        Ok(())
    }

    fn no_reply(&mut self) -> Result<(), Error> {
        if self.reset.phase != ResetPhase::Idle && self.reset.countdown > 0 {
            self.reset.countdown -= 1;
            warn!("no reply to interface clear, {} retries left", self.reset.countdown);
            self.retry_clear();
            Ok(())
        }
        else {
            Err(Error::BrokenLoop)
        }
    }

    /// start the interface clear sequence, the bus is disabled until it succeeds
    pub(super) fn arm_reset(&mut self) {
        self.reset = Reset::idle();
        self.bus_enabled = false;
        self.retry_clear();
    }
    fn retry_clear(&mut self) {
        self.core.begin();
        self.read = None;
        self.reset.phase = ResetPhase::AwaitClear;
        self.exchange.status.set_cmd_run(false);
        self.send(message::IFC);
    }

    /// drain or refill the data buffer of a streamed transfer
    fn thresholds(&mut self) {
        let status = &mut self.exchange.status;
        if status.full_listen_buf() && status.run_again_listen_buf() {
            status.set_full_listen_buf(false);
            let data = self.exchange.data.filled();
            self.streamed += data.len();
            self.handler.drain(data);
            self.exchange.data.rewind();
        }
        else if status.empty_talk_buf() && status.run_again_talk_buf() {
            status.set_empty_talk_buf(false);
            if ! self.handler.fill(&mut self.exchange.data) {
                self.exchange.status.set_run_again_talk_buf(false);
            }
        }
    }

    /// end of a transaction, successful or not
    fn finish(&mut self) {
        self.active = None;
        self.stack.clear();
        self.pending = None;
        self.exchange.status.set_run_again_listen_buf(false);
        self.exchange.status.set_run_again_talk_buf(false);
    }

    fn fail(&mut self, error: Error) {
        warn!("loop transaction failed: {}", error);
        if self.deferred.take().is_some() {
            warn!("deferred request dropped");
        }
        if error.resets() {
            self.restart();
            self.faulted = true;
        }
        else {
            if self.in_print()
                {self.printer.clear()}
            self.finish();
            self.read = None;
            let status = &mut self.exchange.status;
            status.set_cmd_new(false);
            status.set_cmd_run(false);
            status.clear_termination();
        }
    }

    /// full reset, the loop needs an interface clear before the next transaction
    fn restart(&mut self) {
        self.core.begin();
        self.exchange = Exchange::default();
        self.latched = Command::Nop;
        self.read = None;
        self.reset = Reset::idle();
        self.active = None;
        self.stack.clear();
        self.pending = None;
        self.deferred = None;
        self.printer.clear();
        self.streamed = 0;
        self.bus_enabled = false;
        self.faulted = false;
    }

    pub(super) fn check_link(&mut self) -> Result<(), Error> {
        self.transport.check_reachable().map_err(|_| Error::BrokenIp)
    }
    /// load the first chunk of a streamed write
    pub(super) fn fill_stream(&mut self) {
        if ! self.handler.fill(&mut self.exchange.data)
            {self.exchange.status.set_run_again_talk_buf(false)}
    }
    /// hand the rest of a streamed read to the handler, returns the total number of bytes received
    pub(super) fn drain_stream(&mut self) -> usize {
        let data = self.exchange.data.filled();
        if ! data.is_empty() {
            self.streamed += data.len();
            self.handler.drain(data);
        }
        self.exchange.data.rewind();
        self.streamed
    }

    /// a print job is running, in the background or spliced in a foreground transaction
    pub(super) fn in_print(&self) -> bool {
        let printing = |continuation: &Continuation| matches!(continuation.completion, Completion::Print(_));
        self.active.iter().chain(self.stack.iter()).any(printing)
            || self.pending.is_some_and(|completion| matches!(completion, Completion::Print(_)))
    }
    /// the running transaction is a background print
    pub(super) fn printing_in_background(&self) -> bool {
        self.stack.root().or(self.active.as_ref())
            .is_some_and(|root| matches!(root.completion, Completion::Print(_)))
    }

    /// latch a command for the core
    pub(super) fn latch(&mut self, command: Command) {
        trace!("latch {:?}", command);
        self.latched = command;
        self.exchange.status.set_cmd_new(true);
        self.exchange.status.set_cmd_hshk(false);
        self.faulted = false;
    }
    pub(super) fn send(&mut self, raw: u16) {
        self.latch(Command::Send(Frame::from_raw(raw)));
    }
    pub(super) fn send_frame(&mut self, frame: Frame) {
        self.latch(Command::Send(frame));
    }

    /// step the active continuation resumes at
    pub(super) fn goto(&mut self, step: u8) {
        if let Some(active) = self.active.as_mut()
            {active.step = step}
    }
    pub(super) fn advance(&mut self) {
        if let Some(active) = self.active.as_mut()
            {active.step += 1}
    }
    /// suspend the active continuation and run `completion` from its first step
    pub(super) fn call(&mut self, completion: Completion) -> Result<(), Error> {
        let active = self.active.as_mut().ok_or(Error::Internal)?;
        self.stack.call(active, completion)
    }
    /// resume the last suspended continuation
    pub(super) fn ret(&mut self) -> Result<(), Error> {
        let active = self.active.as_mut().ok_or(Error::Internal)?;
        self.stack.ret(active)
    }
    /// splice the pending completion into the running transaction, false if none is pending
    pub(super) fn insert_pending(&mut self) -> Result<bool, Error> {
        match self.pending {
            None => Ok(false),
            Some(completion) => {
                self.call(completion)?;
                self.pending = None;
                Ok(true)
            },
        }
    }

    /// start a transaction, preceded by an interface clear if the loop is not cleared yet
    pub(super) fn launch(&mut self, completion: Completion) -> Result<Progress, Error> {
        debug!("launch {:?}", completion);
        self.active = Some(Continuation::new(completion));
        self.stack.clear();
        self.streamed = 0;
        if completion == Completion::InterfaceClear
            {self.latch(Command::Nop)}
        else if ! self.bus_enabled {
            self.call(Completion::InterfaceClear)?;
            self.latch(Command::Nop);
        }
        else
            {self.send(message::AAU)}
        Ok(Progress::Running)
    }

    /// run the active completion at its current step
    fn complete(&mut self) -> Result<Progress, Error> {
        let Some(current) = self.active
            else {return Ok(Progress::Done)};
        trace!("{:?} step {}", current.completion, current.step);
        match current.completion {
            Completion::InterfaceClear => self.clear_completion(current.step),
            Completion::LoopSize => self.loop_size_completion(current.step),
            Completion::Status => self.status_completion(current.step),
            Completion::DeviceId => self.id_completion(current.step),
            Completion::AccessoryId => self.aid_completion(current.step),
            Completion::ClearDevice => self.clear_device_completion(current.step),
            Completion::ClearLoop => self.clear_loop_completion(current.step),
            Completion::AccessoryIdProbe => self.aid_probe_completion(current.step),
            Completion::Input(mode) => self.input_completion(mode, current.step),
            Completion::Output => self.output_completion(current.step),
            Completion::Print(cursor) => self.print_completion(cursor, current.step),
        }
    }
}
