pub mod connection;
pub mod decoder;
pub mod transport;
pub mod websocket;

pub use connection::{FatalAlert, StreamConnection};
pub use decoder::EventDecoder;
pub use websocket::WebSocketConnector;
