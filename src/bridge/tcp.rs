use packbytes::{FromBytes, ToBytes};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, ToSocketAddrs},
    sync::mpsc,
    };
use std::io;
use log::{info, warn};

use crate::{
    frame::Frame,
    transport::{Transport, LinkBroken},
    };
use super::Channels;


/**
    loop made of TCP links

    frames are sent as 2 big endian bytes to the next device, and received from the previous device connecting to our listening address.
*/
pub struct TcpBridge {
    channels: Channels,
}

impl TcpBridge {
    /// listen on `listen` for the previous device, connect to `next`, and wait for the previous device
    pub async fn connect(listen: impl ToSocketAddrs, next: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(listen).await?;
        let transmitter = TcpStream::connect(next).await?;
        transmitter.set_nodelay(true)?;
        let (receiver, previous) = listener.accept().await?;
        info!("loop closed through {}", previous);

        let (transmit, outgoing) = mpsc::unbounded_channel();
        let (incoming, receive) = mpsc::unbounded_channel();
        tokio::spawn(run_receive(receiver, incoming));
        tokio::spawn(run_transmit(transmitter, outgoing));
        Ok(Self {channels: Channels {transmit, receive}})
    }
}

impl Transport for TcpBridge {
    fn write(&mut self, frame: Frame) -> Result<(), LinkBroken>  {self.channels.write(frame)}
    fn read(&mut self) -> Result<Option<Frame>, LinkBroken>  {self.channels.read()}
    fn check_reachable(&mut self) -> Result<(), LinkBroken>  {self.channels.check_reachable()}
}

async fn run_receive(mut stream: TcpStream, incoming: mpsc::UnboundedSender<Frame>) {
    let mut bytes = [0u8; 2];
    loop {
        if let Err(error) = stream.read_exact(&mut bytes).await {
            warn!("loop link reception ended: {}", error);
            break
        }
        if incoming.send(Frame::from_be_bytes(bytes)).is_err()
            {break}
    }
}

async fn run_transmit(mut stream: TcpStream, mut outgoing: mpsc::UnboundedReceiver<Frame>) {
    while let Some(frame) = outgoing.recv().await {
        if let Err(error) = stream.write_all(&frame.to_be_bytes()).await {
            warn!("loop link transmission failed: {}", error);
            break
        }
    }
}
