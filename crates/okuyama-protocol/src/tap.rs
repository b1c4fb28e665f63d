//! Diagnostic mirror of the bytes exchanged on a connection
//!
//! A tap only observes: it sees each chunk after it was written or read
//! and cannot change what goes over the wire.

use std::fmt;

use tracing::trace;

/// Sink for mirrored wire bytes
pub trait StreamTap: Send + Sync + fmt::Debug {
    fn outbound(&self, peer: &str, bytes: &[u8]);
    fn inbound(&self, peer: &str, bytes: &[u8]);
}

/// Rendering used by [`TracingTap`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TapFormat {
    /// Lossy UTF-8, good enough for the text protocol
    #[default]
    Text,
    /// Lowercase hex
    Hex,
}

/// Tap that emits every chunk as a `trace` event on target `okuyama::wire`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTap {
    format: TapFormat,
}

impl TracingTap {
    pub const fn new(format: TapFormat) -> Self {
        Self { format }
    }

    fn render(self, bytes: &[u8]) -> String {
        match self.format {
            TapFormat::Text => String::from_utf8_lossy(bytes).into_owned(),
            TapFormat::Hex => hex::encode(bytes),
        }
    }
}

impl StreamTap for TracingTap {
    fn outbound(&self, peer: &str, bytes: &[u8]) {
        trace!(target: "okuyama::wire", peer, len = bytes.len(), data = %self.render(bytes), ">>");
    }

    fn inbound(&self, peer: &str, bytes: &[u8]) {
        trace!(target: "okuyama::wire", peer, len = bytes.len(), data = %self.render(bytes), "<<");
    }
}

/// A tap bound to the peer label of one connection
#[derive(Clone, Copy)]
pub struct TapContext<'a> {
    tap: &'a dyn StreamTap,
    peer: &'a str,
}

impl<'a> TapContext<'a> {
    pub fn new(tap: &'a dyn StreamTap, peer: &'a str) -> Self {
        Self { tap, peer }
    }

    pub(crate) fn outbound(self, bytes: &[u8]) {
        self.tap.outbound(self.peer, bytes);
    }

    pub(crate) fn inbound(self, bytes: &[u8]) {
        self.tap.inbound(self.peer, bytes);
    }
}

impl fmt::Debug for TapContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TapContext")
            .field("tap", &self.tap)
            .field("peer", &self.peer)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records mirrored chunks for assertions
    #[derive(Debug, Default)]
    pub(crate) struct RecordingTap {
        pub(crate) outbound: Mutex<Vec<u8>>,
        pub(crate) inbound: Mutex<Vec<u8>>,
    }

    impl RecordingTap {
        pub(crate) fn outbound_bytes(&self) -> Vec<u8> {
            self.outbound.lock().map(|b| b.clone()).unwrap_or_default()
        }

        pub(crate) fn inbound_bytes(&self) -> Vec<u8> {
            self.inbound.lock().map(|b| b.clone()).unwrap_or_default()
        }
    }

    impl StreamTap for RecordingTap {
        fn outbound(&self, _peer: &str, bytes: &[u8]) {
            if let Ok(mut buf) = self.outbound.lock() {
                buf.extend_from_slice(bytes);
            }
        }

        fn inbound(&self, _peer: &str, bytes: &[u8]) {
            if let Ok(mut buf) = self.inbound.lock() {
                buf.extend_from_slice(bytes);
            }
        }
    }

    #[test]
    fn test_render_formats() {
        assert_eq!(TracingTap::new(TapFormat::Text).render(b"2,true\n"), "2,true\n");
        assert_eq!(TracingTap::new(TapFormat::Hex).render(b"2,"), "322c");
    }

    #[test]
    fn test_context_forwards_to_tap() {
        let tap = RecordingTap::default();
        let ctx = TapContext::new(&tap, "127.0.0.1:8888");
        ctx.outbound(b"2,a2V5\n");
        ctx.inbound(b"2,false,\n");
        assert_eq!(tap.outbound_bytes(), b"2,a2V5\n");
        assert_eq!(tap.inbound_bytes(), b"2,false,\n");
    }
}
