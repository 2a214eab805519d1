// msgsrv-client - Minimal blocking client for the message server
//
// Used by the server's integration tests and handy for poking a running
// server by hand.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use msgsrv_common::{DELIMITER, PRIVATE_MARKER, flag};

const CHUNK: usize = 4096;

/// A plaintext connection speaking the delimiter-framed line protocol.
pub struct Client {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl Client {
    pub fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Client {
            stream,
            buf: Vec::with_capacity(CHUNK),
        })
    }

    /// Sends one message, appending the delimiter.
    pub fn send_raw(&mut self, line: &str) -> io::Result<()> {
        let framed = format!("{line}{DELIMITER}");
        self.stream.write_all(framed.as_bytes())?;
        self.stream.flush()
    }

    /// Sends `C <name> <host> <db> <ssl> <version>`.
    pub fn join(
        &mut self,
        name: &str,
        db_host: &str,
        db_name: &str,
        ssl: bool,
        version: u32,
    ) -> io::Result<()> {
        self.send_raw(&format!("C {name} {db_host} {db_name} {} {version}", flag(ssl)))
    }

    /// Sends a chat line.
    pub fn say(&mut self, text: &str) -> io::Result<()> {
        self.send_raw(&format!("M {text}"))
    }

    /// Sends a chat line only `recipients` (and the sender) will see.
    ///
    /// The server splits the recipient list on whitespace.
    pub fn whisper(&mut self, text: &str, recipients: &[&str]) -> io::Result<()> {
        self.say(&whisper_body(text, recipients))
    }

    /// Sends `D <name>`.
    pub fn leave(&mut self, name: &str) -> io::Result<()> {
        self.send_raw(&format!("D {name}"))
    }

    /// Next message, without its delimiter. `Ok(None)` if nothing arrives
    /// within `timeout`; `UnexpectedEof` once the server has closed.
    pub fn recv(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.take_frame() {
                return Ok(Some(frame));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match self.fill(remaining) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(_) => {}
                Err(err) if is_timeout(&err) => return Ok(None),
                Err(err) => return Err(err),
            }
        }
    }

    /// Collects messages up to and including the first one matching `done`.
    pub fn recv_until<F>(&mut self, timeout: Duration, mut done: F) -> io::Result<Vec<String>>
    where
        F: FnMut(&str) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut frames = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.recv(remaining)? {
                Some(frame) => {
                    let finished = done(&frame);
                    frames.push(frame);
                    if finished {
                        return Ok(frames);
                    }
                }
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("gave up waiting; received {frames:?}"),
                    ));
                }
            }
        }
    }

    /// Everything that arrives until the line has been quiet for `quiet`.
    pub fn drain(&mut self, quiet: Duration) -> io::Result<Vec<String>> {
        let mut frames = Vec::new();
        while let Some(frame) = self.recv(quiet)? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Reads until the server closes the connection, returning whatever
    /// arrived first. Fails with `TimedOut` if it stays open.
    pub fn wait_closed(&mut self, timeout: Duration) -> io::Result<Vec<String>> {
        let deadline = Instant::now() + timeout;
        let mut frames = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.recv(remaining) {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => return Err(io::ErrorKind::TimedOut.into()),
                Err(err) if is_closed(&err) => return Ok(frames),
                Err(err) => return Err(err),
            }
        }
    }

    /// Closes both directions without sending `D`.
    pub fn abort(self) -> io::Result<()> {
        self.stream.shutdown(Shutdown::Both)
    }

    fn fill(&mut self, timeout: Duration) -> io::Result<usize> {
        self.stream
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        let mut chunk = [0u8; CHUNK];
        let n = self.stream.read(&mut chunk)?;
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    fn take_frame(&mut self) -> Option<String> {
        loop {
            let (at, skip) = find_terminator(&self.buf)?;
            let raw: Vec<u8> = self.buf.drain(..at + skip).take(at).collect();
            let frame = String::from_utf8_lossy(&raw).trim().to_string();
            if !frame.is_empty() {
                return Some(frame);
            }
        }
    }
}

fn whisper_body(text: &str, recipients: &[&str]) -> String {
    format!("{text}{PRIVATE_MARKER}{}", recipients.join(" "))
}

fn find_terminator(buf: &[u8]) -> Option<(usize, usize)> {
    let delimiter = DELIMITER.as_bytes();
    let newline = buf.iter().position(|&b| b == b'\n').map(|at| (at, 1));
    let framed = buf
        .windows(delimiter.len())
        .position(|window| window == delimiter)
        .map(|at| (at, delimiter.len()));
    match (newline, framed) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

fn is_closed(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}
