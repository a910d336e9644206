//! The raw tunnel extension: a thin passthrough over [`DirectStreamAccess`]
//! for callers (e.g. a CONNECT proxy tunnel) that want the upgraded stream
//! verbatim, with no framing layered on top.

use bytes::Bytes;

use super::{DirectStreamAccess, RecvFlags};
use crate::Result;

/// Hands the caller the upgraded stream with no interpretation of its
/// contents, beyond tracking whether it has been closed.
#[derive(Debug)]
pub struct RawExtension {
    dsa: DirectStreamAccess,
}

impl RawExtension {
    pub(crate) fn new(dsa: DirectStreamAccess) -> Self {
        RawExtension { dsa }
    }

    pub async fn send(&mut self, data: Bytes) -> Result<()> {
        self.dsa.send(data).await
    }

    pub async fn recv(&mut self, n: Option<usize>) -> Result<(Bytes, bool, RecvFlags)> {
        self.dsa.recv_extended(n).await
    }

    pub fn close(&mut self) {
        self.dsa.close();
    }

    pub fn is_closed(&self) -> bool {
        self.dsa.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::Mutex as AsyncMutex;

    use super::*;
    use crate::backend::Connection;

    #[tokio::test]
    async fn closing_raw_extension_closes_underlying_stream() {
        let conn = Arc::new(AsyncMutex::new(Connection::test_stub()));
        let mut raw = RawExtension::new(DirectStreamAccess::new(conn, 0));
        assert!(!raw.is_closed());
        raw.close();
        assert!(raw.is_closed());
        assert!(raw.send(Bytes::new()).await.is_err());
    }
}
