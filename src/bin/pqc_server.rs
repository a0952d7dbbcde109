//! Interactive post-quantum test server, one thread per connection.
//!
//! Accepts clients on the given port, keys each connection in its worker
//! thread, and holds a conversation: toggle keywords are answered
//! automatically, anything else is answered by the operator at the
//! terminal.

use std::io::{self, Write};
use std::net::TcpStream;
use std::thread;

use secure_kyber_socket::{Acceptor, Endpoint};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_PORT: u16 = 777;
const NUM_CONNECTIONS: i32 = 10;

const BANNER: &str =
    "\nPQC Test Server\n===============\n\nType \"PQC-ON\" or \"PQC-OFF\" to set cryptography.\n";

fn handle_client(stream: TcpStream) -> secure_kyber_socket::Result<()> {
    // Key establishment runs here, on the thread that owns the connection.
    let mut endpoint = Endpoint::from_stream(stream, true)?;
    info!(fd = endpoint.raw_fd(), "client connection keyed");

    endpoint.send_text(BANNER)?;

    loop {
        let message = match endpoint.receive_text() {
            Ok(message) => message,
            Err(_) => {
                info!("client disconnected");
                return Ok(());
            }
        };

        // Toggle keywords flip this side after the triggering message has
        // been received, so the next response already uses the new mode.
        let response = match message.as_str() {
            "PQC-OFF" => {
                endpoint.set_cryptography(false)?;
                "PQC disabled on server.".to_string()
            }
            "PQC-ON" => {
                endpoint.set_cryptography(true)?;
                "PQC enabled on server.".to_string()
            }
            _ => {
                print!("Enter Response: ");
                io::stdout().flush()?;
                let mut line = String::new();
                io::stdin().read_line(&mut line)?;
                line.trim_end().to_string()
            }
        };

        endpoint.send_text(&response)?;
    }
}

fn main() -> secure_kyber_socket::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let port = std::env::args()
        .nth(1)
        .map(|p| p.parse().expect("invalid port"))
        .unwrap_or(DEFAULT_PORT);

    let acceptor = Acceptor::bind(port, NUM_CONNECTIONS, true, true)?;
    info!(port, "now listening for client connections");

    loop {
        match acceptor.accept_stream() {
            Ok(stream) => {
                thread::spawn(move || {
                    if let Err(e) = handle_client(stream) {
                        error!("client handler error: {e}");
                    }
                });
            }
            Err(e) => error!("error accepting client: {e}"),
        }
    }
}
