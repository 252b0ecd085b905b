use tokio::sync::mpsc;
use vnet_core::{
    link::{LinkConfig, PhysicalAddress},
    links::MemoryLink,
    protocols::ipv4::{Ipv4Address, Ipv4Packet},
    Node, Shutdown,
};

/// A node and the test-protocol packets it receives.
pub struct TestNode {
    pub node: Node,
    pub received: mpsc::UnboundedReceiver<Ipv4Packet>,
}

/// The address of node `i` on its link toward node `i + 1`.
pub fn right_of(i: usize) -> Ipv4Address {
    Ipv4Address::new([10, 0, i as u8, 1])
}

/// The address of node `i + 1` on its link toward node `i`.
pub fn left_of(i: usize) -> Ipv4Address {
    Ipv4Address::new([10, 0, i as u8, 2])
}

fn config(local_vip: Ipv4Address, remote_vip: Ipv4Address) -> LinkConfig {
    LinkConfig {
        local: PhysicalAddress::new("localhost", 0),
        local_vip,
        remote: PhysicalAddress::new("localhost", 0),
        remote_vip,
    }
}

/// Starts `len` nodes joined in a line by in-memory links that lose
/// `failure_rate` of their frames.
pub async fn chain(len: usize, failure_rate: f64) -> anyhow::Result<Vec<TestNode>> {
    let shutdown = Shutdown::new();
    let mut links = vec![];
    let mut frames = vec![];
    for _ in 0..len {
        let (send, recv) = mpsc::unbounded_channel();
        links.push(MemoryLink::unreliable(send, failure_rate));
        frames.push(recv);
    }

    let mut configs = vec![vec![]; len];
    for i in 0..len - 1 {
        MemoryLink::connect(&links[i], right_of(i), &links[i + 1], left_of(i));
        configs[i].push(config(right_of(i), left_of(i)));
        configs[i + 1].push(config(left_of(i), right_of(i)));
    }

    let mut nodes = vec![];
    for ((link, frames), configs) in links.into_iter().zip(frames).zip(configs) {
        let (node, received) = Node::with_link(&configs, link, frames, shutdown.clone()).await?;
        nodes.push(TestNode { node, received });
    }
    Ok(nodes)
}
