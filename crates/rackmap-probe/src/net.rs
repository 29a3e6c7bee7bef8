//! Network liveness probes

use tokio::process::Command;
use tracing::trace;

/// ICMP liveness with a bounded echo count.
///
/// Used for USB-networked boards: the pinged address sits on the host-side
/// virtual interface, which exists only while the board is powered.
pub async fn ping_alive(ip: &str, count: u32) -> bool {
    let result = Command::new("ping")
        .args(["-c", &count.to_string(), "-W", "1", ip])
        .output()
        .await;

    let alive = matches!(result, Ok(ref output) if output.status.success());
    trace!(ip = %ip, alive = alive, "Ping liveness");
    alive
}

/// SSH handshake liveness.
///
/// PC-like devices may firewall ping, but their test image always runs an
/// SSH server with the harness key authorized, so a batch-mode handshake is
/// the reliable signal.
pub async fn ssh_alive(ip: &str, connect_timeout_secs: u64) -> bool {
    let result = Command::new("ssh")
        .args([
            "-o",
            "BatchMode=yes",
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            &format!("ConnectTimeout={}", connect_timeout_secs),
            &format!("root@{}", ip),
            "true",
        ])
        .output()
        .await;

    let alive = matches!(result, Ok(ref output) if output.status.success());
    trace!(ip = %ip, alive = alive, "SSH liveness");
    alive
}
