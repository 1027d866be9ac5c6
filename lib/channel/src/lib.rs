pub mod combined;
pub mod duplex;

pub use combined::{CombinedChannelClient, CombinedChannelServer};
pub use duplex::{ChannelConfig, ChannelHandler, Direction, DuplexChannel, Mode, NamedChannelListener, PipeKind};
