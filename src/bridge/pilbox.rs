use serial2_tokio::{SerialPort, CharSize, StopBits, Parity};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    sync::mpsc,
    task::JoinHandle,
    time::timeout,
    };
use std::{
    io,
    path::Path,
    time::Duration,
    };
use log::{debug, info, warn};

use crate::{
    frame::{Frame, message, PilBoxEncoder, PilBoxDecoder},
    transport::{Transport, LinkBroken},
    };
use super::{Channels, timed_out};


/// baud rate of the adapter
pub const PILBOX_RATE: u32 = 115_200;

/**
    serial loop adapter

    the adapter is switched to controller mode when opened, and back to device mode when closed
*/
pub struct PilBox {
    channels: Channels,
    port: SerialPort,
    receiver: JoinHandle<()>,
    transmitter: JoinHandle<()>,
}

impl PilBox {
    /// open the adapter on the given serial port and switch it to controller mode
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let mut port = SerialPort::open(path, |mut settings: serial2_tokio::Settings| {
                settings.set_raw();
                settings.set_baud_rate(PILBOX_RATE)?;
                settings.set_char_size(CharSize::Bits8);
                settings.set_stop_bits(StopBits::One);
                settings.set_parity(Parity::None);
                Ok(settings)
                })?;
        exchange(&mut port, Frame::from_raw(message::CON)).await?;
        info!("loop adapter in controller mode");

        let receiver = port.try_clone()?;
        let transmitter = port.try_clone()?;
        let (transmit, outgoing) = mpsc::unbounded_channel();
        let (incoming, receive) = mpsc::unbounded_channel();
        Ok(Self {
            channels: Channels {transmit, receive},
            port,
            receiver: tokio::spawn(run_receive(receiver, incoming)),
            transmitter: tokio::spawn(run_transmit(transmitter, outgoing)),
        })
    }

    /// switch the adapter back to device mode
    pub async fn close(mut self) -> io::Result<()> {
        // frames still queued are written before the transmission task ends
        drop(self.channels);
        let _ = self.transmitter.await;
        // the reception task would consume the acknowledge
        self.receiver.abort();
        let _ = self.receiver.await;
        exchange(&mut self.port, Frame::from_raw(message::COFF)).await?;
        info!("loop adapter released");
        Ok(())
    }
}

impl Transport for PilBox {
    fn write(&mut self, frame: Frame) -> Result<(), LinkBroken>  {self.channels.write(frame)}
    fn read(&mut self) -> Result<Option<Frame>, LinkBroken>  {self.channels.read()}
    fn check_reachable(&mut self) -> Result<(), LinkBroken>  {self.channels.check_reachable()}
}

/// send an adapter command and wait for its acknowledge
async fn exchange(port: &mut SerialPort, command: Frame) -> io::Result<()> {
    let (bytes, size) = PilBoxEncoder::new().encode(command);
    port.write_all(&bytes[.. size]).await?;
    let mut decoder = PilBoxDecoder::new();
    let mut byte = [0u8];
    timeout(Duration::from_secs(1), async {
        loop {
            port.read_exact(&mut byte).await?;
            if let Some(frame) = decoder.push(byte[0]) {
                if frame == command
                    {return Ok(())}
                debug!("ignoring {:03x} while waiting for adapter acknowledge", frame.raw());
            }
        }
    }).await
    .map_err(|_| timed_out("loop adapter"))?
}

async fn run_receive(port: SerialPort, incoming: mpsc::UnboundedSender<Frame>) {
    let mut decoder = PilBoxDecoder::new();
    let mut buffer = [0u8; 64];
    loop {
        let size = match port.read(&mut buffer).await {
            Ok(0) => break,
            Ok(size) => size,
            Err(error) => {
                warn!("loop adapter reception failed: {}", error);
                break
            },
        };
        for frame in buffer[.. size].iter().filter_map(|&byte| decoder.push(byte)) {
            if incoming.send(frame).is_err()
                {return}
        }
    }
}

async fn run_transmit(port: SerialPort, mut outgoing: mpsc::UnboundedReceiver<Frame>) {
    let mut encoder = PilBoxEncoder::new();
    while let Some(frame) = outgoing.recv().await {
        let (bytes, size) = encoder.encode(frame);
        if let Err(error) = port.write_all(&bytes[.. size]).await {
            warn!("loop adapter transmission failed: {}", error);
            break
        }
    }
}
