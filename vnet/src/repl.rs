//! Drives a node from lines typed at the terminal.

use crate::command::{Command, HELP};
use std::{
    fmt::Write as _,
    io::Write as _,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use vnet_core::{
    protocols::{
        ipv4::{Ipv4Address, Ipv4Packet, ProtocolNumber, SendError},
        tcp::{SocketError, SocketId, TCP_MTU},
        Tcp,
    },
    Node,
};

#[derive(Debug, thiserror::Error)]
pub enum ReplError {
    #[error("{0} ({})", .0.errno())]
    Socket(#[from] SocketError),
    #[error("{0}")]
    Send(#[from] SendError),
    #[error("No interface with id {0}")]
    NoInterface(usize),
    #[error("{path}: {source}")]
    File {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub struct Repl {
    node: Node,
}

impl Repl {
    pub fn new(node: Node) -> Self {
        Self { node }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    fn tcp(&self) -> &Arc<Tcp> {
        self.node.tcp()
    }

    /// Reads commands from stdin until `quit`, end of input, or Ctrl-C,
    /// printing test packets from `received` as they arrive.
    pub async fn run(self, mut received: mpsc::UnboundedReceiver<Ipv4Packet>) {
        tokio::spawn(async move {
            while let Some(packet) = received.recv().await {
                println!(
                    "Received test packet: Src: {}, Dst: {}, Data: {}",
                    packet.header.source,
                    packet.header.destination,
                    String::from_utf8_lossy(&packet.payload)
                );
            }
        });

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("> ");
            let _ = std::io::stdout().flush();
            let line = tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!("Could not read from stdin: {}", e);
                        break;
                    }
                },
            };
            if line.trim().is_empty() {
                continue;
            }
            let command: Command = match line.parse() {
                Ok(command) => command,
                Err(e) => {
                    println!("{e}");
                    continue;
                }
            };
            let quit = command == Command::Quit;
            match self.execute(command).await {
                Ok(output) if output.is_empty() => {}
                Ok(output) => println!("{output}"),
                Err(e) => println!("Error: {e}"),
            }
            if quit {
                return;
            }
        }
        self.node.shut_down();
    }

    /// Carries out one command, returning what to show the user. Commands
    /// that wait on a peer indefinitely are left running in the background.
    pub async fn execute(&self, command: Command) -> Result<String, ReplError> {
        let tcp = self.tcp();
        let output = match command {
            Command::Help => HELP.to_string(),
            Command::Interfaces => self.interfaces(),
            Command::Routes => self.routes(),
            Command::Sockets => self.sockets(),
            Command::Down(id) => self.change_interface(id, false)?,
            Command::Up(id) => self.change_interface(id, true)?,
            Command::SendPacket {
                destination,
                protocol,
                data,
            } => {
                let len = data.len();
                self.node.ipv4().send_message(
                    None,
                    destination,
                    ProtocolNumber::from(protocol),
                    data.into_bytes(),
                )?;
                format!("Sent {len} bytes to {destination}")
            }
            Command::Accept(port) => {
                let listener = listen(tcp, port).await?;
                tokio::spawn(accept_loop(tcp.clone(), listener));
                format!("Socket {listener} listening on port {port}")
            }
            Command::Connect { address, port } => {
                let socket = tcp.socket();
                tcp.connect(socket, address, port).await?;
                format!("Socket {socket} connected to {address}:{port}")
            }
            Command::Write { socket, data } => {
                let n = tcp.write_all(socket, data.as_bytes()).await?;
                format!("Wrote {n} bytes")
            }
            Command::Read { socket, bytes, all } => {
                let data = if all {
                    tcp.read_all(socket, bytes).await?
                } else {
                    tcp.read(socket, bytes).await?
                };
                format!(
                    "Read {} bytes: {}",
                    data.len(),
                    String::from_utf8_lossy(&data)
                )
            }
            Command::SendFile {
                path,
                address,
                port,
            } => {
                let tcp = tcp.clone();
                tokio::spawn(async move {
                    match send_file(&tcp, &path, address, port).await {
                        Ok(n) => println!("Sent {n} bytes from {}", path.display()),
                        Err(e) => println!("sendfile failed: {e}"),
                    }
                });
                String::new()
            }
            Command::RecvFile { path, port } => {
                let listener = listen(tcp, port).await?;
                let tcp = tcp.clone();
                tokio::spawn(async move {
                    match recv_file(&tcp, listener, &path).await {
                        Ok(n) => println!("Received {n} bytes into {}", path.display()),
                        Err(e) => println!("recvfile failed: {e}"),
                    }
                });
                format!("Waiting for a file on port {port}")
            }
            Command::Shutdown { socket, mode } => {
                tcp.shutdown(socket, mode).await?;
                String::new()
            }
            Command::Close(socket) => {
                tcp.close(socket).await?;
                String::new()
            }
            Command::Window(socket) => {
                let (send, recv) = tcp.window(socket)?;
                format!("Send window: {send}, receive window: {recv}")
            }
            Command::Quit => {
                self.node.shut_down();
                String::new()
            }
        };
        Ok(output)
    }

    fn interfaces(&self) -> String {
        let mut out = String::from("id\tstate\tlocal\t\tremote");
        for interface in self.node.ipv4().interfaces().interfaces() {
            let state = if interface.up { "up" } else { "down" };
            let _ = write!(
                out,
                "\n{}\t{}\t{}\t{}",
                interface.id, state, interface.local_vip, interface.remote_vip
            );
        }
        out
    }

    fn routes(&self) -> String {
        let mut out = String::from("destination\tnext hop\tcost");
        for route in self.node.ipv4().routes() {
            let _ = write!(
                out,
                "\n{}\t{}\t{}",
                route.destination, route.next_hop, route.cost
            );
        }
        out
    }

    fn sockets(&self) -> String {
        let mut out = String::from("socket\tlocal\t\tremote\t\tstate\tsend window\trecv window");
        for socket in self.tcp().sockets() {
            let _ = write!(
                out,
                "\n{}\t{}\t{}\t{}\t{}\t{}",
                socket.id,
                socket.endpoints.local,
                socket.endpoints.remote,
                socket.state,
                socket.send_window,
                socket.recv_window
            );
        }
        out
    }

    fn change_interface(&self, id: usize, up: bool) -> Result<String, ReplError> {
        let interface = self
            .node
            .ipv4()
            .change_interface(id, up)
            .ok_or(ReplError::NoInterface(id))?;
        let state = if up { "up" } else { "down" };
        Ok(format!(
            "Interface {} ({}) is {state}",
            interface.id, interface.local_vip
        ))
    }
}

/// Opens a listening socket on `port`.
async fn listen(tcp: &Tcp, port: u16) -> Result<SocketId, SocketError> {
    let listener = tcp.socket();
    let result = tcp.bind(listener, port).and_then(|_| tcp.listen(listener));
    if let Err(e) = result {
        // Closing an unconnected socket only releases it
        let _ = tcp.close(listener).await;
        return Err(e);
    }
    Ok(listener)
}

async fn accept_loop(tcp: Arc<Tcp>, listener: SocketId) {
    loop {
        match tcp.accept(listener).await {
            Ok(socket) => println!("Accepted socket {socket} on listener {listener}"),
            Err(e) => {
                tracing::info!("Stopped accepting on socket {}: {}", listener, e);
                break;
            }
        }
    }
}

/// Connects to `address:port` and sends the whole file at `path`, then closes
/// the connection. Returns the number of bytes sent.
pub async fn send_file(
    tcp: &Tcp,
    path: &Path,
    address: Ipv4Address,
    port: u16,
) -> Result<usize, ReplError> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|source| ReplError::File {
            path: path.to_owned(),
            source,
        })?;
    let socket = tcp.socket();
    tcp.connect(socket, address, port).await?;
    let mut sent = 0;
    for chunk in data.chunks(TCP_MTU * 16) {
        sent += tcp.write_all(socket, chunk).await?;
    }
    tcp.close(socket).await?;
    Ok(sent)
}

/// Accepts one connection on `listener`, closes the listener, and saves
/// everything the peer sends to `path`. Returns the number of bytes saved.
pub async fn recv_file(tcp: &Tcp, listener: SocketId, path: &Path) -> Result<usize, ReplError> {
    let accepted = tcp.accept(listener).await;
    tcp.close(listener).await?;
    let socket = accepted?;

    let mut data = vec![];
    loop {
        let chunk = tcp.read(socket, TCP_MTU * 16).await?;
        if chunk.is_empty() {
            break;
        }
        data.extend_from_slice(&chunk);
    }
    tcp.close(socket).await?;
    tokio::fs::write(path, &data)
        .await
        .map_err(|source| ReplError::File {
            path: path.to_owned(),
            source,
        })?;
    Ok(data.len())
}
