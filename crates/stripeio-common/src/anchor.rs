//! Enumeration anchors
//!
//! An anchor is a client-owned opaque cursor into a server-side enumeration
//! stream. The server encodes its resumption position into the body; the
//! client must carry it byte-for-byte across retries and continuations so
//! the position is reproducible. Two independent streams have unrelated
//! anchors.

use serde::{Deserialize, Serialize};

/// Bytes of server-owned cursor state carried in an anchor.
pub const ANCHOR_BODY_SIZE: usize = 104;

/// Opaque enumeration cursor.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    state: AnchorState,
    #[serde(with = "serde_bytes_array")]
    body: [u8; ANCHOR_BODY_SIZE],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum AnchorState {
    /// Enumeration has not started
    Start,
    /// Mid-stream; `body` holds the server cursor
    InProgress,
    /// Stream exhausted
    Eof,
}

mod serde_bytes_array {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<[u8; super::ANCHOR_BODY_SIZE], D::Error> {
        let v = Vec::<u8>::deserialize(deserializer)?;
        v.try_into()
            .map_err(|_| D::Error::custom("anchor body length mismatch"))
    }
}

impl Anchor {
    /// A fresh anchor positioned before the first record.
    #[must_use]
    pub const fn start() -> Self {
        Self {
            state: AnchorState::Start,
            body: [0u8; ANCHOR_BODY_SIZE],
        }
    }

    /// Whether enumeration has not yet begun.
    #[must_use]
    pub fn is_start(&self) -> bool {
        self.state == AnchorState::Start
    }

    /// Whether the stream has been fully consumed.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.state == AnchorState::Eof
    }

    /// Record server cursor bytes returned with an enumeration reply.
    pub fn set_position(&mut self, body: [u8; ANCHOR_BODY_SIZE]) {
        self.state = AnchorState::InProgress;
        self.body = body;
    }

    /// Mark the stream exhausted.
    pub fn set_eof(&mut self) {
        self.state = AnchorState::Eof;
    }

    /// Server cursor bytes to echo on the next continuation.
    #[must_use]
    pub const fn body(&self) -> &[u8; ANCHOR_BODY_SIZE] {
        &self.body
    }

    /// Byte-for-byte copy from another anchor. Retries and continuations
    /// must go through this rather than rebuilding a cursor.
    pub fn copy_from(&mut self, src: &Self) {
        *self = *src;
    }
}

impl Default for Anchor {
    fn default() -> Self {
        Self::start()
    }
}

impl std::fmt::Debug for Anchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Anchor({:?})", self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_lifecycle() {
        let mut anchor = Anchor::start();
        assert!(anchor.is_start());
        assert!(!anchor.is_eof());

        let mut body = [0u8; ANCHOR_BODY_SIZE];
        body[..4].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        anchor.set_position(body);
        assert!(!anchor.is_start());
        assert_eq!(&anchor.body()[..4], &[0xde, 0xad, 0xbe, 0xef]);

        anchor.set_eof();
        assert!(anchor.is_eof());
    }

    #[test]
    fn test_anchor_copy_is_exact() {
        let mut src = Anchor::start();
        let mut body = [0u8; ANCHOR_BODY_SIZE];
        for (i, b) in body.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        src.set_position(body);

        let mut dst = Anchor::start();
        dst.copy_from(&src);
        assert_eq!(dst, src);
        assert_eq!(dst.body(), src.body());
    }
}
