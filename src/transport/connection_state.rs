use tokio::sync::broadcast;
use tracing::trace;

/// Advisory connection health: `Trouble` after repeated connection errors, `Ok` once a connection
///  is established again. Requests continue to be issued and resolved either way.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Trouble,
    Ok,
}

pub struct ConnectionStateNotifier {
    sender: broadcast::Sender<ConnectionState>,
}
impl ConnectionStateNotifier {
    pub fn new() -> ConnectionStateNotifier {
        let (sender, _) = broadcast::channel(16);

        ConnectionStateNotifier {
            sender
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionState> {
        self.sender.subscribe()
    }

    pub fn send_state(&self, state: ConnectionState) {
        trace!("connection state: {:?}", state);
        let _ = self.sender.send(state);
    }
}
