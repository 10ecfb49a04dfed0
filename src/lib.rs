pub mod config;
pub mod dedup;
pub mod error;
pub mod event;
pub mod header;
pub mod neighbor;
pub mod node;
pub mod packet;
pub mod queue;
pub mod routing;
pub mod timer;
pub mod transport;

mod discovery;
mod maintenance;

pub use config::{AodvConfig, IntermediateReply, OverflowPolicy};
pub use error::{ConfigError, PacketError, RouteError};
pub use event::Event;
pub use neighbor::{Neighbor, NeighborTable};
pub use node::{AodvNode, DropReason, ForwardingDecision};
pub use packet::{AODV_PORT, ControlPacket, DataPacket, IpHeader};
pub use queue::{Completion, Outcome};
pub use routing::{Route, RouteEntry, RouteSnapshot, RouteState, RoutingTable};
pub use transport::{Interface, RecvMeta, Transmission, Transport};
