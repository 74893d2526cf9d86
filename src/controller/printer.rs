/*!
    loop printers: discovery, print queue and payload encoding

    Print requests are queued as records. The first request starts a print job, either in the background when the loop is free, or spliced in the running transaction when issued from one of its completions. The job finds a printer, then for every record reads the printer status, encodes the record for the printer's current mode and sends it.

    Encodings target the HP 82162A thermal printer (accessory id `0x20`): an escape sequence switches it to 8 bit mode, mode bytes set justification, character width and case, and characters go through its character set. Other printers receive plain 7 bit text.
*/

use bilge::prelude::*;
use packbytes::{FromBytes, ToBytes};
use log::{debug, warn};

use crate::{
    pack_bilge,
    frame::{Frame, message},
    settings::DeviceRole,
    transport::Transport,
    };
use super::{
    Error,
    worker::{LoopEngine, Progress, BufferHandler},
    exchange::{Selected, DATA_SIZE},
    protocol::Command,
    stack::{Completion, Continuation},
    commands::Admission,
    };


/// accessory id of the 82162A printer
pub const HP82162A: u8 = 0x20;
/// records waiting in the print queue
pub const QUEUE_SIZE: usize = 8;
/// longest text line printed
pub const TEXT_SIZE: usize = 100;
/// bytes of a raster bitmap
pub const RASTER_SIZE: usize = 512;
/// widest raster printed, in columns
pub const RASTER_WIDTH: usize = 168;

/// a text line
pub type Line = heapless::Vec<u8, TEXT_SIZE>;
/// one column per byte, bit n is the n-th row of a band
pub type Columns = heapless::Vec<u8, RASTER_WIDTH>;
/// bytes sent to the printer
pub type PrintPayload = heapless::Vec<u8, DATA_SIZE>;

/// printer mode, second byte of the 82162A status, also used as the format of a text record
#[bitsize(8)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq, Eq)]
pub struct PrinterMode {
    pub lowercase: bool,
    /// column (graphics) mode
    pub column: bool,
    pub double_wide: bool,
    pub right_justify: bool,
    /// 8 bit character set
    pub eight_bit: bool,
    pub buffer_empty: bool,
    pub idle: bool,
    pub end_of_line: bool,
}
pack_bilge!(PrinterMode, u8);

impl PrinterMode {
    pub fn from_raw(raw: u8) -> Self  {Self::from(raw)}
    pub fn raw(self) -> u8  {u8::from(self)}
}
impl Default for PrinterMode {
    fn default() -> Self  {Self::from_raw(0)}
}

/// status of an 82162A as returned to a status request
#[derive(FromBytes, ToBytes, Copy, Clone, Debug, PartialEq, Eq)]
pub struct PrinterStatus {
    pub flags: u8,
    pub mode: PrinterMode,
}
impl PrinterStatus {
    pub fn error(&self) -> bool  {self.flags & 0x08 != 0}
}

/// raster bitmap as laid out by the calculator display, one bit per pixel with the lowest bit leftmost
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Raster {
    bits: heapless::Vec<u8, RASTER_SIZE>,
    bytes_per_line: usize,
    x: usize,
    width: usize,
    height: usize,
    /// first row of the next band
    row: usize,
}
impl Raster {
    /// bitmap part starting at column `x` and row `y`, ending before column `width` and row `height`
    pub fn new(bits: &[u8], bytes_per_line: usize, x: usize, y: usize, width: usize, height: usize) -> Result<Self, Error> {
        let line_width = bytes_per_line.checked_mul(8).ok_or(Error::InvalidData)?;
        let size = bytes_per_line.checked_mul(height).ok_or(Error::InvalidData)?;
        if width > RASTER_WIDTH
            || width > line_width
            || size > bits.len()
            || x > width
            {return Err(Error::InvalidData)}
        let bits = heapless::Vec::from_slice(&bits[.. size])
            .map_err(|_| Error::InvalidData)?;
        Ok(Self {bits, bytes_per_line, x, width, height, row: y})
    }
    fn pixel(&self, x: usize, y: usize) -> bool {
        self.bits[(x >> 3) + self.bytes_per_line * y] & (1 << (x & 7)) != 0
    }
    /// columns of the next band of 7 rows, columns left of `x` are blank
    pub fn band(&self) -> Columns {
        (0 .. self.width).map(|x| {
            if x < self.x
                {return 0}
            (0 .. 7)
                .filter(|&row| self.row + row < self.height && self.pixel(x, self.row + row))
                .fold(0, |column, row| column | 1 << row)
        }).collect()
    }
    /// move to the next band, false once all rows were printed
    pub fn advance(&mut self) -> bool {
        self.row += 7;
        self.row < self.height
    }
}

/// queued print request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrintRecord {
    Text {format: PrinterMode, text: Line},
    Raster(Raster),
}

/// print queue and the printer found by the last job
#[derive(Clone, Debug, Default)]
pub struct Printer {
    queue: heapless::Vec<PrintRecord, QUEUE_SIZE>,
    next: usize,
    address: Option<u8>,
    aid: u8,
}
impl Printer {
    /// records not printed yet
    pub fn queued(&self) -> usize  {self.queue.len() - self.next}
    /// loop address of the printer used by the last job
    pub fn address(&self) -> Option<u8>  {self.address}
    pub fn clear(&mut self) {
        self.queue.clear();
        self.next = 0;
    }
    fn push(&mut self, record: PrintRecord) -> bool {
        self.queue.push(record).is_ok()
    }
    fn current(&self) -> Option<&PrintRecord> {
        self.queue.get(self.next)
    }
    /// go to the next band or record, false once the queue is drained
    fn advance(&mut self) -> bool {
        if let Some(PrintRecord::Raster(raster)) = self.queue.get_mut(self.next) {
            if raster.advance()
                {return true}
        }
        self.next += 1;
        self.next < self.queue.len()
    }
}

/// locals of a print job
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PrintCursor {
    /// address being probed
    candidate: u8,
    /// last address on the loop
    last: u8,
}

/// translation from calculator characters to the 82162A character set, entries with the high bit set need the 7 bit set
const TRANSLATE: [u8; 128] = [
    0xaf, 0x01, 0x3f, 0x53, 0x1f, 0x7e, 0x3e, 0x7b,
    0x3f, 0x3f, 0x0a, 0x3f, 0x1d, 0x0d, 0x07, 0x7d,
    0x03, 0x0c, 0x1e, 0x3f, 0x13, 0x3f, 0x16, 0x7c,
    0x45, 0x1b, 0x3f, 0x3f, 0x17, 0x1a, 0x1e, 0x3f,
    0x20, 0x21, 0x22, 0x23, 0x24, 0x25, 0x26, 0x27,
    0x28, 0x29, 0x2a, 0x2b, 0x2c, 0x2d, 0x2e, 0x2f,
    0x30, 0x31, 0x32, 0x33, 0x34, 0x35, 0x36, 0x37,
    0x38, 0x39, 0x3a, 0x3b, 0x3c, 0x3d, 0x3e, 0x3f,
    0x40, 0x41, 0x42, 0x43, 0x44, 0x45, 0x46, 0x47,
    0x48, 0x49, 0x4a, 0x4b, 0x4c, 0x4d, 0x4e, 0x4f,
    0x50, 0x51, 0x52, 0x53, 0x54, 0x55, 0x56, 0x57,
    0x58, 0x59, 0x5a, 0x5b, 0x5c, 0x5d, 0x5e, 0x5f,
    0x60, 0x61, 0x62, 0x63, 0x64, 0x65, 0x66, 0x67,
    0x68, 0x69, 0x6a, 0x6b, 0x6c, 0x6d, 0x6e, 0x6f,
    0x70, 0x71, 0x72, 0x73, 0x74, 0x75, 0x76, 0x77,
    0x78, 0x79, 0x7a, 0xfb, 0xfc, 0xfd, 0xfe, 0x7f,
];

const ESCAPE_8BIT: [u8; 2] = [0x1b, 0x7c];
const SWITCH_7BIT: u8 = 0xfc;
const JUSTIFY: u8 = 0xe0;
const FORMAT: u8 = 0xd0;
const COLUMN_MODE: u8 = 0xd2;
const SKIP_COLUMNS: u8 = 0xb8;
const MAX_SKIP: u8 = 7;
const CRLF: [u8; 2] = [0x0d, 0x0a];

// payload capacity exceeds the longest encoding of a line or band
fn put(payload: &mut PrintPayload, bytes: &[u8]) {
    let _ = payload.extend_from_slice(bytes);
}

/**
    encode a text line for a printer with accessory id `aid` currently in mode `device`

    for the 82162A, mode bytes are only emitted where `format` differs from the printer mode
*/
pub fn encode_text(text: &[u8], format: PrinterMode, device: PrinterMode, aid: u8) -> PrintPayload {
    let mut payload = PrintPayload::new();
    let text = &text[.. text.len().min(TEXT_SIZE)];
    if aid != HP82162A {
        for &c in text {
            put(&mut payload, &[c & 0x7f]);
        }
        put(&mut payload, &CRLF);
        return payload
    }

    if ! device.eight_bit()
        {put(&mut payload, &ESCAPE_8BIT)}
    if device.right_justify() != format.right_justify()
        {put(&mut payload, &[JUSTIFY | format.raw() & 0x08])}
    if device.lowercase() != format.lowercase() || device.double_wide() != format.double_wide()
        {put(&mut payload, &[FORMAT | format.raw() & 0x05])}
    let mut eight_bit = true;
    for &c in text {
        let code = TRANSLATE[usize::from(c & 0x7f)];
        if code & 0x80 != 0 && eight_bit {
            put(&mut payload, &[SWITCH_7BIT]);
            eight_bit = false;
        }
        put(&mut payload, &[code & 0x7f]);
    }
    put(&mut payload, &CRLF);
    payload
}

/// printer character codes printed by an 82162A payload, without control sequences
pub fn printed_text(payload: &[u8]) -> Line {
    let mut text = Line::new();
    let mut bytes = payload.iter().copied().peekable();
    while let Some(byte) = bytes.next() {
        if byte == ESCAPE_8BIT[0] && bytes.peek() == Some(&ESCAPE_8BIT[1]) {
            bytes.next();
        }
        else if byte == CRLF[0] || byte == CRLF[1] || byte & 0x80 != 0
            {continue}
        else if text.push(byte).is_err()
            {break}
    }
    text
}

/**
    encode a band of raster columns for an 82162A in mode `device`

    the printer is switched to column mode, runs of blank columns become skip markers of at most 7 columns, trailing blank columns are dropped
*/
pub fn compress_columns(columns: &[u8], device: PrinterMode) -> PrintPayload {
    let mut payload = PrintPayload::new();
    if ! device.eight_bit()
        {put(&mut payload, &ESCAPE_8BIT)}
    if device.right_justify()
        {put(&mut payload, &[JUSTIFY])}
    if ! device.column()
        {put(&mut payload, &[COLUMN_MODE])}
    let mut skipped = 0;
    for &column in columns {
        if column == 0 {
            if skipped == MAX_SKIP {
                put(&mut payload, &[SKIP_COLUMNS + skipped]);
                skipped = 0;
            }
            skipped += 1;
        }
        else {
            if skipped != 0 {
                put(&mut payload, &[SKIP_COLUMNS + skipped]);
                skipped = 0;
            }
            put(&mut payload, &[column & 0x7f]);
        }
    }
    put(&mut payload, &[FORMAT, CRLF[0]]);
    payload
}

/// columns printed by a payload from [compress_columns], padded with blank columns to `width`
pub fn expand_columns(payload: &[u8], width: usize) -> Columns {
    let mut columns = Columns::new();
    let mut bytes = payload.iter().copied().peekable();
    while let Some(byte) = bytes.next() {
        match byte {
            0x1b if bytes.peek() == Some(&ESCAPE_8BIT[1]) => {bytes.next();},
            FORMAT => break,
            0xb9 ..= 0xbf => {
                for _ in 0 .. byte - SKIP_COLUMNS {
                    let _ = columns.push(0);
                }
            },
            0x00 ..= 0x7f => {let _ = columns.push(byte);},
            _ => {},
        }
    }
    while columns.len() < width.min(RASTER_WIDTH) {
        let _ = columns.push(0);
    }
    columns
}


impl<T: Transport, H: BufferHandler> LoopEngine<T, H> {
    /**
        print a text line with the current case and width flags

        nothing is printed when loop printing is disabled. A print job starts if none is running.
    */
    pub fn print_text(&mut self, text: &[u8], left_justified: bool) -> Result<(), Error> {
        if self.settings.printer == DeviceRole::Disabled
            {return Ok(())}
        let flags = self.registers.flags;
        let mut format = PrinterMode::default();
        format.set_lowercase(flags.lowercase_print);
        format.set_double_wide(flags.double_wide_print);
        format.set_right_justify(! left_justified);
        let text = text[.. text.len().min(TEXT_SIZE)].iter().copied().collect();
        self.queue_print(PrintRecord::Text {format, text})
    }

    /// print a part of the display bitmap, see [Raster::new]
    pub fn print_lcd(&mut self, bits: &[u8], bytes_per_line: usize, x: usize, y: usize, width: usize, height: usize) -> Result<(), Error> {
        if self.settings.printer == DeviceRole::Disabled
            {return Ok(())}
        let raster = Raster::new(bits, bytes_per_line, x, y, width, height)?;
        self.queue_print(PrintRecord::Raster(raster))
    }

    /// loop address of the printer used by the last print job
    pub fn printer_address(&self) -> Option<u8> {
        self.printer.address()
    }

    fn queue_print(&mut self, record: PrintRecord) -> Result<(), Error> {
        match self.admit()? {
            // issued from a completion
            Admission::Ready if self.active.is_some() => {
                if ! self.in_print()
                    {self.pending = Some(Completion::Print(PrintCursor::default()))}
            },
            Admission::Ready => {
                self.launch(Completion::Print(PrintCursor::default()))?;
            },
            // the running job will print it
            Admission::Overlapped => {},
        }
        if ! self.printer.push(record)
            {warn!("print queue full, record dropped")}
        Ok(())
    }

    fn set_cursor(&mut self, cursor: PrintCursor) {
        if let Some(Continuation {completion: Completion::Print(current), ..}) = self.active.as_mut()
            {*current = cursor}
    }

    /// probe the accessory id of `address` into the alternate buffer
    fn probe_printer(&mut self, address: u8) -> Result<(), Error> {
        self.exchange.select(Selected::Alt, 1);
        self.send_frame(Frame::tad(address));
        self.call(Completion::AccessoryIdProbe)
    }

    pub(super) fn print_completion(&mut self, mut cursor: PrintCursor, step: u8) -> Result<Progress, Error> {
        match step {
            0 => {
                self.send_frame(Frame::aad(1));
                self.goto(1);
            },
            // choose the first candidate
            1 => {
                cursor.last = self.core.last_received()
                    .filter(|frame| frame.is_aad())
                    .map_or(0, |frame| frame.address().saturating_sub(1));
                let (candidate, polling) = match self.settings.printer {
                    DeviceRole::Address(address) => (address, false),
                    _ if self.settings.manual_io => (self.settings.selected, false),
                    _ if self.settings.selected != 0 => (self.settings.selected, true),
                    _ => (1, true),
                };
                cursor.candidate = candidate;
                debug!("looking for a printer from address {}", cursor.candidate);
                self.set_cursor(cursor);
                self.goto(if polling {2} else {3});
                self.probe_printer(cursor.candidate)?;
            },
            // poll the following addresses until a printer answers
            2 => {
                let found = self.exchange.alt.filled().first().is_some_and(|&aid| is_printer(aid));
                if ! found && cursor.candidate < cursor.last {
                    cursor.candidate += 1;
                    self.set_cursor(cursor);
                    self.probe_printer(cursor.candidate)?;
                }
                else {
                    self.latch(Command::Nop);
                    self.goto(3);
                }
            },
            3 => {
                let aid = *self.exchange.alt.filled().first().ok_or(Error::NoResponse)?;
                if ! is_printer(aid)
                    {return Err(Error::NoPrinter)}
                debug!("printer {:#x} found at address {}", aid, cursor.candidate);
                self.printer.address = Some(cursor.candidate);
                self.printer.aid = aid;
                self.send_frame(Frame::tad(cursor.candidate));
                self.goto(4);
            },
            // read the printer status
            4 => {
                self.exchange.select(Selected::Alt, 2);
                self.latch(Command::Listen);
                self.goto(5);
            },
            5 => {
                self.send(message::SST);
                self.goto(6);
            },
            6 => {
                self.latch(Command::Unlisten);
                if self.exchange.alt.is_empty()
                    {return Err(Error::NoResponse)}
                self.goto(7);
            },
            7 => {
                self.send(message::UNT);
                self.goto(8);
            },
            // encode the current record for the printer mode and send it
            8 => {
                let reply = self.exchange.alt.filled();
                let status = PrinterStatus::from_be_bytes(reply.try_into().map_err(|_| Error::NoResponse)?);
                if status.error()
                    {return Err(Error::PrinterError)}
                let payload = match self.printer.current() {
                    Some(PrintRecord::Text {format, text}) => encode_text(text, *format, status.mode, self.printer.aid),
                    Some(PrintRecord::Raster(raster)) => compress_columns(&raster.band(), status.mode),
                    None => {
                        self.latch(Command::Nop);
                        self.goto(12);
                        return Ok(Progress::Running)
                    },
                };
                self.exchange.data.load(&payload);
                self.exchange.selected = Selected::Data;
                self.exchange.status.set_last_is_end_talk_buf(false);
                self.exchange.status.set_run_again_talk_buf(false);
                self.send_frame(Frame::lad(cursor.candidate));
                self.goto(9);
            },
            9 => {
                self.latch(Command::Talk);
                self.goto(10);
            },
            10 => {
                self.send(message::UNL);
                let more = self.printer.advance();
                self.goto(if more {11} else {12});
            },
            11 => {
                self.send_frame(Frame::tad(cursor.candidate));
                self.goto(4);
            },
            // records queued while the last one was being unaddressed
            12 if self.printer.current().is_some() => {
                self.send_frame(Frame::tad(cursor.candidate));
                self.goto(4);
            },
            _ => {
                debug!("print job done");
                self.printer.clear();
                if self.stack.is_empty()
                    {return Ok(Progress::Done)}
                // spliced in a transaction, resume it
                self.ret()?;
                self.latch(Command::Nop);
            },
        }
        Ok(Progress::Running)
    }
}

fn is_printer(aid: u8) -> bool {
    aid & 0x20 == 0x20
}


#[cfg(test)]
mod tests {
    use super::*;

    fn mode(raw: u8) -> PrinterMode  {PrinterMode::from_raw(raw)}

    #[test]
    fn status_bytes() {
        let status = PrinterStatus::from_be_bytes([0x08, 0x15]);
        assert!(status.error());
        assert!(status.mode.lowercase());
        assert!(status.mode.double_wide());
        assert!(status.mode.eight_bit());
        assert!(! status.mode.column());
        assert_eq!(status.to_be_bytes(), [0x08, 0x15]);
    }

    #[test]
    fn text_for_82162a() {
        // printer in 7 bit mode, left justified, normal case
        let payload = encode_text(b"AB", mode(0), mode(0), HP82162A);
        assert_eq!(payload.as_slice(), &[0x1b, 0x7c, 0x41, 0x42, 0x0d, 0x0a]);
        // printer already in 8 bit mode, right justified lowercase line
        let payload = encode_text(b"x", mode(0x09), mode(0x10), HP82162A);
        assert_eq!(payload.as_slice(), &[0xe8, 0xd1, 0x78, 0x0d, 0x0a]);
        // characters needing the 7 bit set switch only once
        let payload = encode_text(&[0x00, 0x7b, b'a'], mode(0), mode(0x10), HP82162A);
        assert_eq!(payload.as_slice(), &[0xfc, 0x2f, 0x7b, 0x61, 0x0d, 0x0a]);
        assert_eq!(printed_text(&payload).as_slice(), &[0x2f, 0x7b, 0x61]);
    }

    #[test]
    fn full_line_text() {
        let text = b"The Quick Brown Fox Jumps Over 13 Lazy Dogs";
        assert_eq!(text.len(), 43);
        let mut format = mode(0);
        format.set_lowercase(true);
        let payload = encode_text(text, format, mode(0x10), HP82162A);
        assert_eq!(payload[0], 0xd1);
        assert!(payload.ends_with(&[0x0d, 0x0a]));
        assert_eq!(printed_text(&payload).as_slice(), text);
    }

    #[test]
    fn text_for_other_printers() {
        let payload = encode_text(&[b'o', b'k', 0xc1], mode(0x08), mode(0), 0x21);
        assert_eq!(payload.as_slice(), &[b'o', b'k', 0x41, 0x0d, 0x0a]);
    }

    #[test]
    fn text_truncated() {
        let long = [b'a'; 150];
        let payload = encode_text(&long, mode(0), mode(0x10), HP82162A);
        assert_eq!(payload.len(), TEXT_SIZE + 2);
    }

    #[test]
    fn column_skips() {
        let mut columns = Columns::new();
        columns.push(0x11).unwrap();
        columns.extend_from_slice(&[0; 3]).unwrap();
        columns.push(0x22).unwrap();
        columns.extend_from_slice(&[0; 9]).unwrap();
        columns.push(0x33).unwrap();
        columns.extend_from_slice(&[0; 4]).unwrap();
        let payload = compress_columns(&columns, mode(0x12));
        assert_eq!(payload.as_slice(), &[0x11, 0xbb, 0x22, 0xbf, 0xba, 0x33, 0xd0, 0x0d]);
        assert_eq!(expand_columns(&payload, columns.len()), columns);

        let payload = compress_columns(&[0x01], mode(0x08));
        assert_eq!(payload.as_slice(), &[0x1b, 0x7c, 0xe0, 0xd2, 0x01, 0xd0, 0x0d]);
    }

    #[test]
    fn raster_bands() {
        // 10 columns wide, 9 rows, a diagonal
        let mut bits = [0u8; 18];
        for i in 0 .. 9 {
            bits[(i >> 3) + 2 * i] |= 1 << (i & 7);
        }
        let mut raster = Raster::new(&bits, 2, 0, 0, 10, 9).unwrap();
        let band = raster.band();
        assert_eq!(band.as_slice(), &[0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0, 0, 0]);
        assert!(raster.advance());
        let band = raster.band();
        assert_eq!(band.as_slice(), &[0, 0, 0, 0, 0, 0, 0, 0x01, 0x02, 0]);
        assert!(! raster.advance());

        assert_eq!(Raster::new(&bits, 1, 0, 0, 10, 9), Err(Error::InvalidData));
    }

    #[test]
    fn queue_order() {
        let mut printer = Printer::default();
        let text = |s: &[u8]| PrintRecord::Text {format: mode(0), text: s.iter().copied().collect()};
        assert!(printer.push(text(b"one")));
        assert!(printer.push(PrintRecord::Raster(Raster::new(&[0xff; 16], 1, 0, 0, 8, 16).unwrap())));
        assert!(printer.push(text(b"two")));
        assert_eq!(printer.queued(), 3);
        assert_eq!(printer.current(), Some(&text(b"one")));
        assert!(printer.advance());
        // the raster takes 3 bands
        assert!(printer.advance());
        assert!(printer.advance());
        assert!(printer.advance());
        assert_eq!(printer.current(), Some(&text(b"two")));
        assert!(! printer.advance());
        assert_eq!(printer.queued(), 0);
    }
}
