//! In-guest agent binary.
//!
//! Listens on vsock port 5000 inside the microVM and serves the framed JSON
//! RPC. One connection at a time; requests on a connection are handled in
//! order. Launched from the guest's init.

#[cfg(target_os = "linux")]
fn main() {
    use std::fs::File;
    use std::os::fd::{AsRawFd, FromRawFd};

    use nix::sys::socket::{
        accept, bind, listen, socket, AddressFamily, Backlog, SockFlag, SockType, VsockAddr,
    };
    use tracing::{error, info, warn};

    use fcbox::agent::serve_connection;
    use fcbox::protocol::{VSOCK_PORT, WORKSPACE_DIR};

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "guest_agent=info".parse().unwrap()),
        )
        .init();

    if let Err(e) = std::fs::create_dir_all(WORKSPACE_DIR) {
        warn!(error = %e, "could not create workspace directory");
    }

    let listener = socket(
        AddressFamily::Vsock,
        SockType::Stream,
        SockFlag::empty(),
        None,
    )
    .expect("vsock socket");

    let addr = VsockAddr::new(libc::VMADDR_CID_ANY, VSOCK_PORT);
    bind(listener.as_raw_fd(), &addr).expect("bind vsock port");
    listen(&listener, Backlog::new(5).expect("backlog")).expect("listen");

    info!(port = VSOCK_PORT, "guest agent listening");

    loop {
        let conn = match accept(listener.as_raw_fd()) {
            Ok(fd) => fd,
            Err(e) => {
                error!(error = %e, "accept failed");
                continue;
            }
        };

        info!("host connected");
        let mut stream = unsafe { File::from_raw_fd(conn) };
        match serve_connection(&mut stream) {
            Ok(()) => info!("host disconnected"),
            Err(e) => warn!(error = %e, "connection error"),
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("guest-agent only runs inside a Linux guest");
    std::process::exit(1);
}
