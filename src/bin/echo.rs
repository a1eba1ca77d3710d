use std::{
    error::Error,
    net::UdpSocket,
    thread,
    time::{Duration, Instant},
};

use smartsock::{utils::ByteBufferPool, SmartSockBuilder};
use tracing::{info, Level};

const LISTEN_ADDR: &str = "0.0.0.0:19479";
const MAX_PAYLOAD: usize = 512;
const FRAGMENT_TIMEOUT_MS: u64 = 3000;
const TICK_INTERVAL_MS: u64 = 10;
const STAT_INTERVAL_S: u64 = 1;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().with_max_level(Level::DEBUG).init();

    let listen_addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| LISTEN_ADDR.to_string());
    let listener = UdpSocket::bind(&listen_addr)?;
    listener.set_nonblocking(true)?;
    info!(addr = %listener.local_addr()?, "listening");

    let pool = ByteBufferPool::new();
    let mut sock = SmartSockBuilder {
        max_payload: MAX_PAYLOAD,
        fragment_timeout: Duration::from_millis(FRAGMENT_TIMEOUT_MS),
        ..SmartSockBuilder::default()
    }
    .build(listener, pool.clone())?;

    let mut old_stat = None;
    let mut last_stat = Instant::now();
    loop {
        let now = Instant::now();
        while let Some(packet) = sock.receive(now)? {
            info!(from = %packet.from(), len = packet.len(), "echo");
            let res = sock.send(packet.from(), packet.payload(), false);
            sock.put_back(packet);
            res?;
        }
        sock.tick(now);

        if now.duration_since(last_stat) >= Duration::from_secs(STAT_INTERVAL_S) {
            let stat = sock.stat();
            if old_stat.as_ref() != Some(&stat) {
                info!(?stat, outstanding = pool.outstanding(), "stat");
            }
            old_stat = Some(stat);
            last_stat = now;
        }

        thread::sleep(Duration::from_millis(TICK_INTERVAL_MS));
    }
}
