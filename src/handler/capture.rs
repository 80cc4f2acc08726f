//! Packet capture sink

/// Receives copies of packets crossing the virtual interface
///
/// Persistence is up to the implementor. Records may already be truncated to
/// the configured record size.
pub trait PacketCapture: Send + Sync {
    /// Record one packet
    fn record(&self, packet: &[u8]);
}

impl<F> PacketCapture for F
where
    F: Fn(&[u8]) + Send + Sync,
{
    fn record(&self, packet: &[u8]) {
        self(packet);
    }
}
