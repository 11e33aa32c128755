//! JSON-RPC over a websocket that keeps requests alive across reconnects

pub mod connection;
pub mod connection_state;
pub mod rpc_frame;
pub mod rpc_socket;
pub mod tungstenite_connector;
