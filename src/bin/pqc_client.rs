//! Interactive client for the post-quantum test server.
//!
//! Connects, prints the server banner, then relays terminal input. The
//! `PQC-ON` / `PQC-OFF` keywords are sent to the server first and applied
//! locally afterwards, keeping both sides of the toggle in lockstep.

use std::io::{self, Write};

use secure_kyber_socket::Endpoint;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 777;

fn main() -> secure_kyber_socket::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = args
        .next()
        .map(|p| p.parse().expect("invalid port"))
        .unwrap_or(DEFAULT_PORT);

    // Auto-print is on: the banner and every response appear on stdout as
    // they arrive.
    let mut endpoint = Endpoint::connect(&host, port, true)?;
    info!("secure connection established to {host}:{port}");

    // Banner comes first.
    endpoint.receive_text()?;

    loop {
        print!("\nInput: ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim_end();

        endpoint.send_text(input)?;

        // Flip after the keyword has gone out, so the server's decrypt of
        // the triggering message still succeeds.
        match input {
            "PQC-OFF" => {
                endpoint.set_cryptography(false)?;
                println!("PQC disabled on client.");
            }
            "PQC-ON" => {
                endpoint.set_cryptography(true)?;
                println!("PQC enabled on client.");
            }
            _ => {}
        }

        endpoint.receive_text()?;
    }

    Ok(())
}
