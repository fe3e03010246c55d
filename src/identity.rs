use crate::env::DB_SINK_BUILD_VERSION_ENV;
use std::net::UdpSocket;

const FALLBACK_NAME: &str = "unknown";
const FALLBACK_IP: &str = "0.0.0.0";

/// Process-wide identity facts stamped onto every row.
///
/// Resolved once at startup; lookup failures degrade to the sentinel
/// values instead of blocking the pipeline.
#[derive(Debug, Clone)]
pub struct HostIdentity {
    pub machine: String,
    pub machine_ip: String,
    pub build_version: String,
}

impl HostIdentity {
    /// Resolve hostname, outbound IP and build version.
    ///
    /// The build version is taken from `build_version` when given, then
    /// from the `DB_SINK_BUILD_VERSION` environment variable, then falls
    /// back to `"unknown"`.
    pub fn resolve(build_version: Option<String>) -> Self {
        let machine = match hostname::get() {
            Ok(name) => name.to_string_lossy().into_owned(),
            Err(error) => {
                tracing::warn!(error = %error, "hostname lookup failed, using fallback");
                FALLBACK_NAME.to_string()
            }
        };

        let machine_ip = match local_ip() {
            Some(ip) => ip,
            None => {
                tracing::warn!("local address lookup failed, using fallback");
                FALLBACK_IP.to_string()
            }
        };

        let build_version = build_version
            .or_else(|| std::env::var(DB_SINK_BUILD_VERSION_ENV).ok())
            .unwrap_or_else(|| FALLBACK_NAME.to_string());

        HostIdentity {
            machine,
            machine_ip,
            build_version,
        }
    }
}

/// Address of the primary outbound interface, learned by "connecting" a
/// UDP socket to a public address. No packet is sent; the OS only picks
/// a route.
fn local_ip() -> Option<String> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).ok()?;
    socket.connect(("8.8.8.8", 80)).ok()?;
    let addr = socket.local_addr().ok()?;
    Some(addr.ip().to_string())
}
