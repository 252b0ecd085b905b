mod common;

use common::{chain, left_of, right_of};
use std::time::Duration;
use vnet_core::protocols::tcp::{ShutdownMode, SocketError, State, FIRST_SOCKET_ID};

const PORT: u16 = 9000;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

#[tokio::test(start_paused = true)]
#[ntest::timeout(20000)]
async fn transfer_survives_a_lossy_path() -> anyhow::Result<()> {
    let nodes = chain(3, 0.05).await?;
    tokio::time::sleep(Duration::from_secs(20)).await;
    let client = nodes[0].node.tcp().clone();
    let server = nodes[2].node.tcp().clone();
    let data = pattern(200_000);

    let listener = server.socket();
    server.bind(listener, PORT)?;
    server.listen(listener)?;
    let expected = data.len();
    let receiver = tokio::spawn(async move {
        let connection = server.accept(listener).await?;
        let received = server.read_all(connection, expected + 1).await?;
        server.close(connection).await?;
        Ok::<_, SocketError>(received)
    });

    let socket = client.socket();
    client.connect(socket, left_of(1), PORT).await?;
    assert_eq!(client.write_all(socket, &data).await?, data.len());
    client.close(socket).await?;

    let received = receiver.await??;
    assert_eq!(received.len(), data.len());
    assert!(received == data);
    Ok(())
}

#[tokio::test(start_paused = true)]
#[ntest::timeout(10000)]
async fn both_sides_close_and_release() -> anyhow::Result<()> {
    let nodes = chain(2, 0.0).await?;
    tokio::time::sleep(Duration::from_secs(10)).await;
    let client = nodes[0].node.tcp().clone();
    let server = nodes[1].node.tcp().clone();

    let listener = server.socket();
    assert_eq!(listener, FIRST_SOCKET_ID);
    server.listen(listener)?;
    let port = server.sockets()[0].endpoints.local.port;

    let accepting = {
        let server = server.clone();
        tokio::spawn(async move { server.accept(listener).await })
    };
    let socket = client.socket();
    client.connect(socket, left_of(0), port).await?;
    let connection = accepting.await??;

    let info = client.sockets()[0];
    assert_eq!(info.state, State::Established);
    assert_eq!(info.endpoints.local.address, right_of(0));
    assert_eq!(info.endpoints.remote.port, port);
    assert_eq!(server.window(connection)?.1, u16::MAX);

    client.write(socket, b"last words")?;
    client.close(socket).await?;
    assert_eq!(server.read_all(connection, 100).await?, b"last words");
    assert_eq!(server.read(connection, 100).await?, b"");

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(client.sockets()[0].state, State::FinWait2);
    assert_eq!(server.sockets()[1].state, State::CloseWait);

    // The server may keep writing after the client's FIN
    server.write_all(connection, b"reply").await?;
    assert_eq!(client.read_all(socket, 5).await?, b"reply");

    server.close(connection).await?;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(client.sockets()[0].state, State::TimeWait);
    assert_eq!(server.sockets().len(), 1);
    assert_eq!(server.sockets()[0].state, State::Listen);

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(client.sockets().is_empty());
    assert_eq!(client.window(socket), Err(SocketError::NotSocket));
    Ok(())
}

#[tokio::test(start_paused = true)]
#[ntest::timeout(10000)]
async fn connect_reports_unreachable_hosts() -> anyhow::Result<()> {
    let nodes = chain(2, 0.0).await?;
    let client = nodes[0].node.tcp();

    let socket = client.socket();
    let result = client.connect(socket, [192, 168, 9, 9].into(), PORT).await;
    assert_eq!(result, Err(SocketError::HostUnreachable));
    assert_eq!(client.window(socket), Err(SocketError::NotSocket));
    Ok(())
}

#[tokio::test(start_paused = true)]
#[ntest::timeout(10000)]
async fn connect_gives_up_without_a_listener() -> anyhow::Result<()> {
    let nodes = chain(2, 0.0).await?;
    tokio::time::sleep(Duration::from_secs(10)).await;
    let client = nodes[0].node.tcp();

    let socket = client.socket();
    let started = tokio::time::Instant::now();
    let result = client.connect(socket, left_of(0), PORT).await;
    assert_eq!(result, Err(SocketError::TimerExpired));
    assert_eq!(started.elapsed(), Duration::from_secs(15));
    Ok(())
}

#[tokio::test(start_paused = true)]
#[ntest::timeout(10000)]
async fn socket_calls_check_their_preconditions() -> anyhow::Result<()> {
    let nodes = chain(2, 0.0).await?;
    tokio::time::sleep(Duration::from_secs(10)).await;
    let tcp = nodes[1].node.tcp();

    let first = tcp.socket();
    let second = tcp.socket();
    tcp.bind(first, PORT)?;
    assert_eq!(tcp.bind(second, PORT), Err(SocketError::AddressInUse));
    assert_eq!(tcp.bind(first, PORT + 1), Err(SocketError::BadDescriptor));

    tcp.listen(first)?;
    assert_eq!(tcp.listen(first), Err(SocketError::AlreadyOpen));
    assert_eq!(
        tcp.connect(first, left_of(0), PORT).await,
        Err(SocketError::AlreadyOpen)
    );
    // The refused connect leaves the listener registered and listening
    let listener = tcp.sockets()[0];
    assert_eq!(listener.id, first);
    assert_eq!(listener.state, State::Listen);
    assert_eq!(tcp.write(first, b"x"), Err(SocketError::NotConnected));
    assert_eq!(tcp.read(second, 1).await, Err(SocketError::ConnectionReset));
    assert_eq!(tcp.accept(second).await, Err(SocketError::NotSupported));
    assert_eq!(tcp.read(99, 1).await, Err(SocketError::NotSocket));

    tcp.shutdown(second, ShutdownMode::Read).await?;
    assert_eq!(tcp.read(second, 1).await, Err(SocketError::NotPermitted));
    assert_eq!("sideways".parse::<ShutdownMode>(), Err(SocketError::InvalidShutdown));

    // Closing a listener frees its port
    tcp.close(first).await?;
    tcp.bind(second, PORT)?;
    Ok(())
}
