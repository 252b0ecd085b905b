mod common;

use common::{chain, left_of, right_of};
use std::time::Duration;
use vnet_core::{
    protocols::ipv4::{ipv4_parsing::DEFAULT_TTL, ProtocolNumber, SendError},
    rib::INFINITY,
};

#[tokio::test(start_paused = true)]
#[ntest::timeout(10000)]
async fn routes_converge_along_a_chain() -> anyhow::Result<()> {
    let nodes = chain(3, 0.0).await?;
    tokio::time::sleep(Duration::from_secs(10)).await;

    let first = nodes[0].node.ipv4();
    let neighbor = first.route(left_of(0)).unwrap();
    assert_eq!((neighbor.next_hop, neighbor.cost), (left_of(0), 1));
    let far = first.route(left_of(1)).unwrap();
    assert_eq!((far.next_hop, far.cost), (left_of(0), 2));
    let own = first.route(right_of(0)).unwrap();
    assert_eq!(own.cost, 0);

    let last = nodes[2].node.ipv4();
    let back = last.route(right_of(0)).unwrap();
    assert_eq!((back.next_hop, back.cost), (right_of(1), 2));
    Ok(())
}

#[tokio::test(start_paused = true)]
#[ntest::timeout(10000)]
async fn test_packets_are_forwarded() -> anyhow::Result<()> {
    let mut nodes = chain(3, 0.0).await?;
    tokio::time::sleep(Duration::from_secs(10)).await;

    nodes[0].node.ipv4().send_message(
        None,
        left_of(1),
        ProtocolNumber::Test,
        b"hello".to_vec(),
    )?;
    let packet = nodes[2].received.recv().await.unwrap();
    assert_eq!(packet.payload, b"hello");
    assert_eq!(packet.header.source, right_of(0));
    assert_eq!(packet.header.time_to_live, DEFAULT_TTL - 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
#[ntest::timeout(10000)]
async fn packets_to_ourselves_skip_the_link() -> anyhow::Result<()> {
    let mut nodes = chain(2, 0.0).await?;
    nodes[1]
        .node
        .ipv4()
        .send_message(None, left_of(0), ProtocolNumber::Test, b"me".to_vec())?;
    let packet = nodes[1].received.recv().await.unwrap();
    assert_eq!(packet.payload, b"me");
    assert_eq!(packet.header.time_to_live, DEFAULT_TTL);
    Ok(())
}

#[tokio::test(start_paused = true)]
#[ntest::timeout(10000)]
async fn a_downed_interface_poisons_its_routes() -> anyhow::Result<()> {
    let nodes = chain(3, 0.0).await?;
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(nodes[0].node.ipv4().route(left_of(1)).unwrap().cost, 2);

    let middle = nodes[1].node.ipv4();
    let interface = middle.change_interface(1, false).unwrap();
    assert_eq!(interface.local_vip, right_of(1));
    assert!(!interface.up);
    assert_eq!(middle.route(right_of(1)).unwrap().cost, INFINITY);

    // The route through the dead link expires, and the news travels on
    tokio::time::sleep(Duration::from_secs(30)).await;
    let route = nodes[0].node.ipv4().route(left_of(1)).unwrap();
    assert_eq!(route.cost, INFINITY);
    assert!(matches!(
        nodes[0].node.ipv4().send_message(
            None,
            left_of(1),
            ProtocolNumber::Test,
            b"lost".to_vec()
        ),
        Err(SendError::InfinityDistance(_))
    ));

    // Bringing it back restores the path
    middle.change_interface(1, true).unwrap();
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(nodes[0].node.ipv4().route(left_of(1)).unwrap().cost, 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
#[ntest::timeout(10000)]
async fn unknown_destinations_are_refused() -> anyhow::Result<()> {
    let nodes = chain(2, 0.0).await?;
    let result = nodes[0].node.ipv4().send_message(
        None,
        [172, 16, 0, 1].into(),
        ProtocolNumber::Test,
        vec![],
    );
    assert!(matches!(result, Err(SendError::UnknownDestination(_))));
    Ok(())
}
