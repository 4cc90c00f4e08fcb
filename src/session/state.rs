use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Standby,
    Connecting,
    Active,
    /// Transient: a failure is being torn down on the way back to Standby.
    Error,
}

impl LinkState {
    pub fn label(&self) -> &'static str {
        match self {
            LinkState::Standby => "standby",
            LinkState::Connecting => "connecting",
            LinkState::Active => "active",
            LinkState::Error => "error",
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Display-only indicators of an active session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Indicators {
    /// Capture is producing input that reaches the channel.
    pub listening: bool,
    /// The agent heard the author and has not answered yet.
    pub thinking: bool,
    pub muted: bool,
}
