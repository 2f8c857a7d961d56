/// Reachability of the render server.
///
/// Owned exclusively by the server monitor; its transitions are the only
/// mutator. `Checking` is always transient: every transition into it is
/// followed by `Online` or `Offline` once the probe resolves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ServerStatus {
    /// No probe has resolved yet (process just started).
    #[default]
    Unknown,
    /// A probe is in flight.
    Checking,
    Online,
    Offline,
}

impl ServerStatus {
    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Checking => "checking",
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}
