//! Connection status of a client session.

/// Ordered session status.
///
/// The happy path only moves forward: `Closed -> Connecting -> Connected ->
/// Handshaking -> Ready`. Any state may drop to `Closed`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NetworkStatus {
    /// Nothing was ever opened.
    #[default]
    Unknown,
    Closed,
    Connecting,
    Connected,
    Handshaking,
    Ready,
}

impl NetworkStatus {
    /// A transport exists and must be pumped by `tick`.
    #[must_use]
    pub fn is_active(self) -> bool {
        self >= Self::Connecting
    }

    /// The transport is up, frames may be written.
    #[must_use]
    pub fn can_send(self) -> bool {
        self >= Self::Connected
    }

    /// Handshake done, requests and notifies are allowed.
    #[must_use]
    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }

    /// Whether `next` is a legal edge from `self`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match next {
            Self::Unknown => false,
            Self::Closed => self != Self::Closed,
            Self::Connecting => matches!(self, Self::Unknown | Self::Closed),
            Self::Connected => self == Self::Connecting,
            Self::Handshaking => self == Self::Connected,
            Self::Ready => self == Self::Handshaking,
        }
    }
}

impl core::fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let label = match self {
            Self::Unknown => "unknown",
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Handshaking => "handshaking",
            Self::Ready => "ready",
        };
        f.write_str(label)
    }
}
