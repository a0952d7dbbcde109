//! Event-driven "3A + 1" service: many clients, one thread.
//!
//! A single loop consults the event manager, accepts new clients on
//! connection attempts, and answers each received integer with the number
//! of Collatz iterations needed to reach 1. The readiness backend is
//! selectable on the command line (`epoll`, `poll`, or `select`).

use std::collections::HashMap;
use std::os::unix::io::{AsRawFd, RawFd};

use secure_kyber_socket::{Acceptor, Backend, Endpoint, EventManager, CONN_ATTEMPT};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_PORT: u16 = 777;
const NUM_CONNECTIONS: usize = 10;
const MAX_NUM_ITERATIONS: i64 = 150;

const WELCOME_MSG: &str =
    "3A + 1 Server\n=============\n\nSend integers to get the 3A + 1 solution.\n";

/// Iterations for `input` to reach 1, or -1 for invalid input, overflow, or
/// non-convergence within the cap.
///
/// The cap is checked unconditionally after the loop: an input whose chain
/// reaches 1 on exactly the 150th step still counts as non-converging.
fn operation_result(input: i64) -> i64 {
    if input < 1 {
        return -1;
    }
    let mut value = input;
    let mut iterations = 0;
    while value != 1 && iterations < MAX_NUM_ITERATIONS {
        value = if value % 2 == 0 {
            value / 2
        } else {
            match value.checked_mul(3).and_then(|v| v.checked_add(1)) {
                Some(v) => v,
                None => return -1,
            }
        };
        iterations += 1;
    }
    if iterations >= MAX_NUM_ITERATIONS {
        -1
    } else {
        iterations
    }
}

fn parse_backend(name: &str) -> Backend {
    match name {
        #[cfg(target_os = "linux")]
        "epoll" => Backend::Epoll,
        "poll" => Backend::Poll,
        "select" => Backend::Select,
        other => panic!("unknown backend {other:?} (expected epoll, poll, or select)"),
    }
}

fn main() -> secure_kyber_socket::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let mut args = std::env::args().skip(1);
    let port = args
        .next()
        .map(|p| p.parse().expect("invalid port"))
        .unwrap_or(DEFAULT_PORT);
    let backend = args
        .next()
        .map(|b| parse_backend(&b))
        .unwrap_or_default();

    let acceptor = Acceptor::bind(port, NUM_CONNECTIONS as i32, false, true)?;
    // A registration failure here is fatal; nothing would ever wake the loop.
    let mut events = EventManager::with_backend(acceptor.as_raw_fd(), NUM_CONNECTIONS, backend)?;
    let mut connections: HashMap<RawFd, Endpoint> = HashMap::new();

    info!(port, ?backend, "now listening for client connections");

    loop {
        let ready = events.wait_for_event()?;

        if ready == CONN_ATTEMPT {
            // Accept failures are local; keep listening.
            let stream = match acceptor.accept_stream() {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("error accepting client: {e}");
                    continue;
                }
            };
            // The handshake runs on the loop thread, stalling it for one
            // KEM round trip. A client that dies mid-handshake costs only
            // this connection.
            let mut endpoint = match Endpoint::from_stream(stream, false) {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    warn!("client connection failed to be established: {e}");
                    continue;
                }
            };
            if endpoint.send_text(WELCOME_MSG).is_err() {
                warn!("client vanished before the welcome message");
                continue;
            }
            let fd = endpoint.raw_fd();
            events.monitor(fd)?;
            connections.insert(fd, endpoint);
            debug!(fd, clients = connections.len(), "new client");
            continue;
        }

        let Some(endpoint) = connections.get_mut(&ready) else {
            error!(fd = ready, "event from unknown client");
            let _ = events.stop_monitoring(ready);
            continue;
        };

        match endpoint.receive_text() {
            Ok(message) => {
                let input = message.trim().parse().unwrap_or(-1);
                let result = operation_result(input);
                if endpoint.send_text(&result.to_string()).is_ok() {
                    debug!(fd = ready, result, "result sent");
                    continue;
                }
                debug!(fd = ready, "send failed, dropping client");
            }
            Err(_) => debug!(fd = ready, "client disconnected"),
        }

        // Deregister before the endpoint drop closes the handle.
        let _ = events.stop_monitoring(ready);
        connections.remove(&ready);
    }
}

#[cfg(test)]
mod tests {
    use super::operation_result;

    #[test]
    fn three_takes_seven_iterations() {
        assert_eq!(operation_result(3), 7);
    }

    #[test]
    fn one_is_already_solved() {
        assert_eq!(operation_result(1), 0);
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        assert_eq!(operation_result(0), -1);
        assert_eq!(operation_result(-5), -1);
    }

    #[test]
    fn powers_of_two_converge_quickly() {
        assert_eq!(operation_result(16), 4);
    }

    #[test]
    fn convergence_on_the_cap_counts_as_non_convergence() {
        // 1145 reaches 1 on exactly the 150th step; the cap check still
        // fires.
        assert_eq!(operation_result(1145), -1);
    }
}
