mod memory;
pub use memory::MemoryLink;

mod udp;
pub use udp::UdpLink;
