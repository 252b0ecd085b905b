use std::time::Duration;
use tokio::sync::mpsc;
use vnet::{
    command::Command,
    repl::{recv_file, send_file, Repl, ReplError},
};
use vnet_core::{
    link::{LinkConfig, PhysicalAddress},
    links::MemoryLink,
    protocols::{ipv4::Ipv4Address, tcp::SocketError},
    Node, Shutdown,
};

const A: Ipv4Address = Ipv4Address::new([192, 168, 0, 1]);
const B: Ipv4Address = Ipv4Address::new([192, 168, 0, 2]);

fn config(local_vip: Ipv4Address, remote_vip: Ipv4Address) -> LinkConfig {
    LinkConfig {
        local: PhysicalAddress::new("localhost", 0),
        local_vip,
        remote: PhysicalAddress::new("localhost", 0),
        remote_vip,
    }
}

/// Two prompts on nodes joined by one in-memory link, once each can reach
/// the other.
async fn pair() -> anyhow::Result<(Repl, Repl)> {
    let shutdown = Shutdown::new();
    let (a_send, a_frames) = mpsc::unbounded_channel();
    let (b_send, b_frames) = mpsc::unbounded_channel();
    let a_link = MemoryLink::new(a_send);
    let b_link = MemoryLink::new(b_send);
    MemoryLink::connect(&a_link, A, &b_link, B);

    let (a, _) = Node::with_link(&[config(A, B)], a_link, a_frames, shutdown.clone()).await?;
    let (b, _) = Node::with_link(&[config(B, A)], b_link, b_frames, shutdown).await?;
    while !reachable(&a, B) || !reachable(&b, A) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Ok((Repl::new(a), Repl::new(b)))
}

fn reachable(node: &Node, destination: Ipv4Address) -> bool {
    node.ipv4()
        .route(destination)
        .map(|route| route.is_reachable())
        .unwrap_or(false)
}

async fn run(repl: &Repl, line: &str) -> Result<String, ReplError> {
    let command = line.parse().expect("a valid command");
    repl.execute(command).await
}

#[tokio::test(start_paused = true)]
#[ntest::timeout(10000)]
async fn lists_interfaces_and_routes() -> anyhow::Result<()> {
    let (a, _b) = pair().await?;

    let interfaces = run(&a, "li").await?;
    assert!(interfaces.contains("0\tup\t192.168.0.1\t192.168.0.2"));

    let routes = run(&a, "lr").await?;
    assert!(routes.contains("192.168.0.2\t192.168.0.2\t1"));
    assert!(routes.contains("192.168.0.1\t192.168.0.1\t0"));

    run(&a, "down 0").await?;
    assert!(run(&a, "li").await?.contains("0\tdown"));
    assert!(matches!(
        run(&a, "send 192.168.0.2 0 hello").await,
        Err(ReplError::Send(_))
    ));
    run(&a, "up 0").await?;
    assert!(matches!(
        run(&a, "down 7").await,
        Err(ReplError::NoInterface(7))
    ));
    Ok(())
}

#[tokio::test(start_paused = true)]
#[ntest::timeout(10000)]
async fn sockets_talk_through_the_prompt() -> anyhow::Result<()> {
    let (a, b) = pair().await?;

    assert_eq!(
        run(&b, "a 9000").await?,
        "Socket 2 listening on port 9000"
    );
    assert_eq!(
        run(&a, "c 192.168.0.2 9000").await?,
        "Socket 2 connected to 192.168.0.2:9000"
    );
    // Let the accept loop pick up the connection
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(run(&b, "ls").await?.contains("ESTABLISHED"));

    assert_eq!(run(&a, "s 2 hello world").await?, "Wrote 11 bytes");
    assert_eq!(run(&b, "r 3 11 y").await?, "Read 11 bytes: hello world");
    assert!(run(&a, "window 2").await?.starts_with("Send window: "));

    let error = run(&a, "r 9 5").await.unwrap_err();
    assert!(matches!(error, ReplError::Socket(SocketError::NotSocket)));
    assert!(error.to_string().ends_with("(-88)"));

    run(&a, "shutdown 2").await?;
    assert_eq!(run(&b, "r 3 5").await?, "Read 0 bytes: ");
    Ok(())
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn files_cross_the_network() -> anyhow::Result<()> {
    let (a, b) = pair().await?;
    let dir = std::env::temp_dir().join(format!("vnet-files-{}", std::process::id()));
    tokio::fs::create_dir_all(&dir).await?;
    let source = dir.join("in.bin");
    let target = dir.join("out.bin");
    let data: Vec<u8> = (0..50_000).map(|i| (i % 253) as u8).collect();
    tokio::fs::write(&source, &data).await?;

    let b_tcp = b.node().tcp().clone();
    let listener = b_tcp.socket();
    b_tcp.bind(listener, 7000)?;
    b_tcp.listen(listener)?;
    let receiving = {
        let target = target.clone();
        tokio::spawn(async move { recv_file(&b_tcp, listener, &target).await })
    };

    let sent = send_file(a.node().tcp(), &source, B, 7000).await?;
    assert_eq!(sent, data.len());
    assert_eq!(receiving.await??, data.len());
    assert_eq!(tokio::fs::read(&target).await?, data);

    assert!(matches!(
        send_file(a.node().tcp(), &dir.join("missing"), B, 7000).await,
        Err(ReplError::File { .. })
    ));
    tokio::fs::remove_dir_all(&dir).await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
#[ntest::timeout(10000)]
async fn quit_stops_the_node() -> anyhow::Result<()> {
    let (a, _b) = pair().await?;
    assert!(run(&a, "help").await?.contains("sendfile"));
    assert_eq!(run(&a, "quit").await?, "");
    assert_eq!(a.execute(Command::Sockets).await?.lines().count(), 1);
    Ok(())
}
