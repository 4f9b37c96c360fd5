pub mod mock;
pub mod serial;
pub mod tcp;
pub mod traits;

#[cfg(test)]
pub use mock::MockHandle;
pub use mock::MockTransport;
pub use serial::{SerialConfig, SerialConnector};
pub use tcp::TcpConnector;
pub use traits::{SharedTransport, Transport, TransportConnector};
