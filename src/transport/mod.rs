pub mod memory;
pub mod tcp;
pub mod traits;

pub use memory::{MemoryConnector, MemoryListener};
pub use tcp::TcpConnector;
pub use traits::{TransportConnector, TransportStream};
