pub mod contacts;
pub mod dispatcher;
pub mod template;
pub mod transport;

pub use contacts::{ContactResolver, ContactSource, DualSourceResolver};
pub use dispatcher::NotificationDispatcher;
pub use transport::{MessageTransport, ModemTransport, TcpModemConnector, TransportError};
