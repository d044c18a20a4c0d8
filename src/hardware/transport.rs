//! Controller Links
//!
//! A [`Transport`] moves one command string to the controller and returns the
//! response payload. Implementations:
//!
//! - [`TcpTransport`] - Galil Ethernet controllers (port 23 by default)
//! - `SerialTransport` - RS-232 / USB-serial, behind the `serial` feature
//! - [`SimulatedController`](crate::hardware::mock::SimulatedController) - in-process model
//!
//! Transports are not shared: the controller facade owns exactly one behind its mutex,
//! so `transact` takes `&mut self`.

use crate::error::LinkError;
use crate::hardware::mock::SimulatedController;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

/// Default Galil Ethernet command port.
pub const DEFAULT_TCP_PORT: u16 = 23;

/// Default baud rate for serial links.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Command terminator written after every command.
const TERMINATOR: &[u8] = b"\r";

/// Upper bound on a single response, guards against a stream that never terminates.
const MAX_RESPONSE_LEN: usize = 64 * 1024;

/// A command link to one controller.
#[async_trait]
pub trait Transport: Send {
    /// Sends one command and returns the response payload without terminators.
    async fn transact(&mut self, command: &str) -> Result<String, LinkError>;

    /// Closes the link. Called at most once by the facade.
    async fn close(&mut self) -> Result<(), LinkError>;

    /// Human readable description of the link (address, firmware, ...).
    fn describe(&self) -> String;
}

/// Parsed controller address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// In-process simulated controller.
    Simulated,
    /// `host:port` of an Ethernet controller.
    Tcp(String),
    /// Serial device path.
    Serial(String),
}

impl Address {
    /// Parses `sim`, a serial path (`/dev/tty*`, `COMn`) or `host[:port]`.
    pub fn parse(address: &str) -> Result<Self, LinkError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(LinkError::UnsupportedAddress(address.to_string()));
        }
        if address.eq_ignore_ascii_case("sim") {
            return Ok(Address::Simulated);
        }
        if is_serial_path(address) {
            return Ok(Address::Serial(address.to_string()));
        }
        if address.contains(':') {
            Ok(Address::Tcp(address.to_string()))
        } else {
            Ok(Address::Tcp(format!("{address}:{DEFAULT_TCP_PORT}")))
        }
    }
}

fn is_serial_path(address: &str) -> bool {
    if address.starts_with("/dev/") {
        return true;
    }
    let upper = address.to_ascii_uppercase();
    upper
        .strip_prefix("COM")
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

/// Opens a transport for `address`.
pub async fn connect(
    address: &Address,
    baud: u32,
    timeout: Duration,
) -> Result<Box<dyn Transport>, LinkError> {
    match address {
        Address::Simulated => Ok(Box::new(SimulatedController::new())),
        Address::Tcp(peer) => Ok(Box::new(TcpTransport::connect(peer, timeout).await?)),
        Address::Serial(path) => open_serial(path, baud, timeout),
    }
}

#[cfg(feature = "serial")]
fn open_serial(
    path: &str,
    baud: u32,
    timeout: Duration,
) -> Result<Box<dyn Transport>, LinkError> {
    Ok(Box::new(serial::SerialTransport::open(path, baud, timeout)?))
}

#[cfg(not(feature = "serial"))]
fn open_serial(
    path: &str,
    _baud: u32,
    _timeout: Duration,
) -> Result<Box<dyn Transport>, LinkError> {
    Err(LinkError::UnsupportedAddress(format!(
        "{path} (built without the `serial` feature)"
    )))
}

/// A byte stream speaking Galil command framing.
///
/// A reply that misses its timeout is still owed by the controller. The link counts
/// those and discards them before the next command goes out, so a late reply is never
/// read as the answer to a later command.
struct FramedLink<S> {
    stream: S,
    timeout: Duration,
    owed_replies: usize,
}

impl<S> FramedLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn new(stream: S, timeout: Duration) -> Self {
        Self {
            stream,
            timeout,
            owed_replies: 0,
        }
    }

    /// Writes `command` and reads the reply up to the controller's terminator.
    ///
    /// `:` ends a successful reply, `?` a rejected one. Carriage returns and line feeds
    /// around the payload are stripped.
    async fn exchange(&mut self, command: &str) -> Result<String, LinkError> {
        self.resync(command).await?;

        let mut frame = Vec::with_capacity(command.len() + TERMINATOR.len());
        frame.extend_from_slice(command.as_bytes());
        frame.extend_from_slice(TERMINATOR);
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;

        match tokio::time::timeout(self.timeout, read_reply(&mut self.stream, command)).await {
            Ok(reply) => reply,
            Err(_) => {
                self.owed_replies += 1;
                Err(LinkError::Timeout(command.to_string()))
            }
        }
    }

    /// Discards replies to earlier timed-out commands. Fails with a timeout naming
    /// `command`, without sending it, if they still have not arrived.
    async fn resync(&mut self, command: &str) -> Result<(), LinkError> {
        while self.owed_replies > 0 {
            match tokio::time::timeout(self.timeout, skip_reply(&mut self.stream)).await {
                Ok(result) => {
                    result?;
                    self.owed_replies -= 1;
                    debug!(remaining = self.owed_replies, "Discarded late reply");
                }
                Err(_) => return Err(LinkError::Timeout(command.to_string())),
            }
        }
        Ok(())
    }

    fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }
}

/// Consumes bytes up to and including the next `:` or `?`.
async fn skip_reply<R>(reader: &mut R) -> Result<(), LinkError>
where
    R: AsyncRead + Unpin + Send,
{
    loop {
        if matches!(reader.read_u8().await?, b':' | b'?') {
            return Ok(());
        }
    }
}

async fn read_reply<R>(reader: &mut R, command: &str) -> Result<String, LinkError>
where
    R: AsyncRead + Unpin + Send,
{
    let mut payload = Vec::new();
    loop {
        let byte = reader.read_u8().await?;
        match byte {
            b':' => break,
            b'?' => {
                return Err(LinkError::Rejected {
                    command: command.to_string(),
                })
            }
            _ => payload.push(byte),
        }
        if payload.len() > MAX_RESPONSE_LEN {
            return Err(LinkError::MalformedResponse {
                command: command.to_string(),
                response: String::from_utf8_lossy(&payload[..64]).into_owned(),
            });
        }
    }
    let text = String::from_utf8_lossy(&payload);
    Ok(text.trim_matches(|c: char| c == '\r' || c == '\n' || c == ' ').to_string())
}

// =============================================================================
// TCP
// =============================================================================

/// Galil Ethernet command link.
pub struct TcpTransport {
    link: FramedLink<BufReader<TcpStream>>,
    peer: String,
}

impl TcpTransport {
    /// Connects to `peer` (`host:port`), bounded by `timeout`.
    pub async fn connect(peer: &str, timeout: Duration) -> Result<Self, LinkError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(peer))
            .await
            .map_err(|_| LinkError::Timeout(format!("connect {peer}")))??;
        stream.set_nodelay(true)?;
        Ok(Self {
            link: FramedLink::new(BufReader::new(stream), timeout),
            peer: peer.to_string(),
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn transact(&mut self, command: &str) -> Result<String, LinkError> {
        self.link.exchange(command).await
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        self.link.get_mut().get_mut().shutdown().await?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.peer)
    }
}

// =============================================================================
// Serial
// =============================================================================

#[cfg(feature = "serial")]
mod serial {
    use super::{FramedLink, Transport};
    use crate::error::LinkError;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio_serial::{SerialPortBuilderExt, SerialStream};

    /// RS-232 / USB-serial command link.
    pub struct SerialTransport {
        link: FramedLink<SerialStream>,
        path: String,
        baud: u32,
    }

    impl SerialTransport {
        pub fn open(path: &str, baud: u32, timeout: Duration) -> Result<Self, LinkError> {
            let port = tokio_serial::new(path, baud)
                .timeout(timeout)
                .open_native_async()
                .map_err(|e| LinkError::Io(e.into()))?;
            Ok(Self {
                link: FramedLink::new(port, timeout),
                path: path.to_string(),
                baud,
            })
        }
    }

    #[async_trait]
    impl Transport for SerialTransport {
        async fn transact(&mut self, command: &str) -> Result<String, LinkError> {
            self.link.exchange(command).await
        }

        async fn close(&mut self) -> Result<(), LinkError> {
            self.link.get_mut().shutdown().await?;
            Ok(())
        }

        fn describe(&self) -> String {
            format!("serial://{}@{}", self.path, self.baud)
        }
    }
}

#[cfg(feature = "serial")]
pub use serial::SerialTransport;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_address_forms() {
        assert_eq!(Address::parse("sim").unwrap(), Address::Simulated);
        assert_eq!(
            Address::parse("192.168.0.100").unwrap(),
            Address::Tcp("192.168.0.100:23".into())
        );
        assert_eq!(
            Address::parse("10.0.0.5:5000").unwrap(),
            Address::Tcp("10.0.0.5:5000".into())
        );
        assert_eq!(
            Address::parse("/dev/ttyUSB0").unwrap(),
            Address::Serial("/dev/ttyUSB0".into())
        );
        assert_eq!(Address::parse("com4").unwrap(), Address::Serial("com4".into()));
        assert!(Address::parse("  ").is_err());
    }

    #[tokio::test]
    async fn reply_reader_handles_terminators() {
        let mut ok: &[u8] = b" 1024\r\n:";
        assert_eq!(read_reply(&mut ok, "TPA=?").await.unwrap(), "1024");

        let mut empty: &[u8] = b":";
        assert_eq!(read_reply(&mut empty, "SHA").await.unwrap(), "");

        let mut rejected: &[u8] = b"?";
        assert!(matches!(
            read_reply(&mut rejected, "BGA").await,
            Err(LinkError::Rejected { .. })
        ));

        let mut truncated: &[u8] = b"12";
        assert!(matches!(
            read_reply(&mut truncated, "TPA=?").await,
            Err(LinkError::Io(_))
        ));
    }

    #[tokio::test]
    async fn tcp_exchange_against_local_listener() {
        use tokio::io::AsyncBufReadExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = BufReader::new(socket);
            let mut buf = Vec::new();
            socket.read_until(b'\r', &mut buf).await.unwrap();
            assert_eq!(buf, b"TPA=?\r");
            socket.get_mut().write_all(b" 42\r\n:").await.unwrap();
        });

        let mut link = TcpTransport::connect(&addr.to_string(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(link.transact("TPA=?").await.unwrap(), "42");
        assert!(link.describe().starts_with("tcp://127.0.0.1"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn late_reply_is_discarded_before_next_command() {
        use tokio::io::AsyncBufReadExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = BufReader::new(socket);
            let mut buf = Vec::new();
            socket.read_until(b'\r', &mut buf).await.unwrap();
            assert_eq!(buf, b"TPA\r");
            tokio::time::sleep(Duration::from_millis(150)).await;
            socket.get_mut().write_all(b" 111\r\n:").await.unwrap();

            buf.clear();
            socket.read_until(b'\r', &mut buf).await.unwrap();
            assert_eq!(buf, b"TVA\r");
            socket.get_mut().write_all(b" 222\r\n:").await.unwrap();
        });

        let mut link = TcpTransport::connect(&addr.to_string(), Duration::from_millis(100))
            .await
            .unwrap();
        assert!(matches!(
            link.transact("TPA").await,
            Err(LinkError::Timeout(c)) if c == "TPA"
        ));
        assert_eq!(link.transact("TVA").await.unwrap(), "222");
        server.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn owed_reply_blocks_the_link_until_it_arrives() {
        let (client, mut controller) = tokio::io::duplex(256);
        let mut link = FramedLink::new(client, Duration::from_millis(50));

        // Only the start of the reply makes it in time.
        controller.write_all(b" 1").await.unwrap();
        assert!(link.exchange("TPA").await.is_err());
        // The rest is still owed: nothing new goes out.
        assert!(matches!(
            link.exchange("TVA").await,
            Err(LinkError::Timeout(c)) if c == "TVA"
        ));
        assert_eq!(link.owed_replies, 1);

        controller.write_all(b"11\r\n: 7\r\n:").await.unwrap();
        assert_eq!(link.exchange("TTA").await.unwrap(), "7");
        assert_eq!(link.owed_replies, 0);

        let mut sent = [0u8; 8];
        controller.read_exact(&mut sent).await.unwrap();
        assert_eq!(&sent, b"TPA\rTTA\r");
    }
}
