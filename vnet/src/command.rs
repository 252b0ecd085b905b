//! The commands typed at a node's prompt.

use std::{path::PathBuf, str::FromStr};
use vnet_core::protocols::{
    ipv4::Ipv4Address,
    tcp::{ShutdownMode, SocketId},
};

pub const HELP: &str = "\
help                              Print this list of commands
interfaces, li                    List interfaces
routes, lr                        List known routes
sockets, ls                       List sockets with their states and windows
down <interface>                  Bring an interface down
up <interface>                    Bring an interface up
send <vip> <protocol> <data>      Send a packet with the given protocol number
accept, a <port>                  Accept connections on a port in the background
connect, c <vip> <port>           Connect to a listening socket
send, s, w <socket> <data>        Write data to a socket
recv, r <socket> <bytes> [y|n]    Read from a socket, with y waiting for all bytes
sendfile <file> <vip> <port>      Connect and send the contents of a file
recvfile <file> <port>            Accept one connection and save what it sends
shutdown <socket> [read|write|both]
                                  Close one or both halves of a connection
close <socket>                    Close a socket
window <socket>                   Show the send and receive windows of a socket
quit, q                           Exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Interfaces,
    Routes,
    Sockets,
    Down(usize),
    Up(usize),
    SendPacket {
        destination: Ipv4Address,
        protocol: u8,
        data: String,
    },
    Accept(u16),
    Connect {
        address: Ipv4Address,
        port: u16,
    },
    Write {
        socket: SocketId,
        data: String,
    },
    Read {
        socket: SocketId,
        bytes: usize,
        /// Wait until every requested byte has arrived
        all: bool,
    },
    SendFile {
        path: PathBuf,
        address: Ipv4Address,
        port: u16,
    },
    RecvFile {
        path: PathBuf,
        port: u16,
    },
    Shutdown {
        socket: SocketId,
        mode: ShutdownMode,
    },
    Close(SocketId),
    Window(SocketId),
    Quit,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command '{0}', try 'help'")]
    Unknown(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
}

/// Splits off the first word of `s`, returning it and the rest.
fn word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}

/// Parses every whitespace-separated argument, failing with `usage` if there
/// are too few, too many, or one does not parse.
fn args<'a, const N: usize>(rest: &'a str, usage: &'static str) -> Result<[&'a str; N], CommandError> {
    let words: Vec<_> = rest.split_whitespace().collect();
    words.try_into().map_err(|_| CommandError::Usage(usage))
}

fn parse<T: FromStr>(s: &str, usage: &'static str) -> Result<T, CommandError> {
    s.parse().map_err(|_| CommandError::Usage(usage))
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        const DOWN: &str = "down <interface>";
        const UP: &str = "up <interface>";
        const SEND: &str = "send <vip> <protocol> <data> | send <socket> <data>";
        const ACCEPT: &str = "accept <port>";
        const CONNECT: &str = "connect <vip> <port>";
        const RECV: &str = "recv <socket> <bytes> [y|n]";
        const SENDFILE: &str = "sendfile <file> <vip> <port>";
        const RECVFILE: &str = "recvfile <file> <port>";
        const SHUTDOWN: &str = "shutdown <socket> [read|write|both]";
        const CLOSE: &str = "close <socket>";
        const WINDOW: &str = "window <socket>";

        let (name, rest) = word(line.trim_end_matches(['\r', '\n']));
        let command = match name {
            "help" | "h" => Self::Help,
            "interfaces" | "li" => Self::Interfaces,
            "routes" | "lr" => Self::Routes,
            "sockets" | "ls" => Self::Sockets,
            "quit" | "q" => Self::Quit,
            "down" => {
                let [id] = args(rest, DOWN)?;
                Self::Down(parse(id, DOWN)?)
            }
            "up" => {
                let [id] = args(rest, UP)?;
                Self::Up(parse(id, UP)?)
            }
            "send" | "s" | "w" => {
                let (first, data) = word(rest);
                if let Ok(socket) = first.parse() {
                    if data.is_empty() {
                        Err(CommandError::Usage(SEND))?
                    }
                    Self::Write {
                        socket,
                        data: data.to_string(),
                    }
                } else if name == "send" {
                    let (protocol, data) = word(data);
                    if data.is_empty() {
                        Err(CommandError::Usage(SEND))?
                    }
                    Self::SendPacket {
                        destination: parse(first, SEND)?,
                        protocol: parse(protocol, SEND)?,
                        data: data.to_string(),
                    }
                } else {
                    Err(CommandError::Usage(SEND))?
                }
            }
            "accept" | "a" => {
                let [port] = args(rest, ACCEPT)?;
                Self::Accept(parse(port, ACCEPT)?)
            }
            "connect" | "c" => {
                let [address, port] = args(rest, CONNECT)?;
                Self::Connect {
                    address: parse(address, CONNECT)?,
                    port: parse(port, CONNECT)?,
                }
            }
            "recv" | "r" => {
                let words: Vec<_> = rest.split_whitespace().collect();
                let (socket, bytes, all) = match words.as_slice() {
                    [socket, bytes] => (socket, bytes, false),
                    [socket, bytes, "y"] => (socket, bytes, true),
                    [socket, bytes, "n"] => (socket, bytes, false),
                    _ => Err(CommandError::Usage(RECV))?,
                };
                Self::Read {
                    socket: parse(socket, RECV)?,
                    bytes: parse(bytes, RECV)?,
                    all,
                }
            }
            "sendfile" => {
                let [path, address, port] = args(rest, SENDFILE)?;
                Self::SendFile {
                    path: path.into(),
                    address: parse(address, SENDFILE)?,
                    port: parse(port, SENDFILE)?,
                }
            }
            "recvfile" => {
                let [path, port] = args(rest, RECVFILE)?;
                Self::RecvFile {
                    path: path.into(),
                    port: parse(port, RECVFILE)?,
                }
            }
            "shutdown" => {
                let words: Vec<_> = rest.split_whitespace().collect();
                let (socket, mode) = match words.as_slice() {
                    [socket] => (socket, ShutdownMode::Write),
                    [socket, mode] => (socket, parse(mode, SHUTDOWN)?),
                    _ => Err(CommandError::Usage(SHUTDOWN))?,
                };
                Self::Shutdown {
                    socket: parse(socket, SHUTDOWN)?,
                    mode,
                }
            }
            "close" => {
                let [socket] = args(rest, CLOSE)?;
                Self::Close(parse(socket, CLOSE)?)
            }
            "window" => {
                let [socket] = args(rest, WINDOW)?;
                Self::Window(parse(socket, WINDOW)?)
            }
            other => Err(CommandError::Unknown(other.to_string()))?,
        };
        Ok(command)
    }
}
