//! Application hooks called by the client.

use eventwire_protocol::Registry;

use crate::client::Connection;
use crate::error::ClientError;

/// Callbacks invoked at the client's lifecycle points.
///
/// Every method has a no-op default. All but `init` and `on_connect_fail`
/// run on the reader thread.
pub trait ClientEvents: Send + Sync + 'static {
    /// Called once from [`Client::new`](crate::Client::new). Register
    /// command handlers here.
    fn init(&self, connection: &Connection, registry: &mut Registry<()>) {
        let _ = (connection, registry);
    }

    /// The socket is open. Runs on the reader thread before the first line
    /// is read, so it always precedes `on_disconnect`.
    fn on_connect(&self, connection: &Connection) {
        let _ = connection;
    }

    /// A connect attempt failed. The session is `Closed`; nothing retries.
    fn on_connect_fail(&self, connection: &Connection, error: &ClientError) {
        let _ = (connection, error);
    }

    /// The session reached `Closed` after having been connected.
    fn on_disconnect(&self, connection: &Connection) {
        let _ = connection;
    }

    /// A line that did not resolve to a handled command.
    fn on_raw_message(&self, connection: &Connection, line: &str) {
        let _ = (connection, line);
    }
}
