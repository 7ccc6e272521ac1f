//! Output verbosity.

use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Everything, including every status snapshot of the monitor.
    Verbose,
    #[default]
    Normal,
    /// Final results only.
    Quiet,
    /// Errors only.
    Silent,
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "verbose" => Ok(Self::Verbose),
            "normal" => Ok(Self::Normal),
            "quiet" => Ok(Self::Quiet),
            "silent" => Ok(Self::Silent),
            _ => Err(format!("unknown output mode: {}", s)),
        }
    }
}

impl OutputMode {
    /// Whether intermediate status snapshots are rendered.
    pub fn shows_snapshots(&self) -> bool {
        matches!(self, Self::Verbose | Self::Normal)
    }

    pub fn shows_spinners(&self) -> bool {
        matches!(self, Self::Verbose | Self::Normal)
    }

    pub fn shows_status(&self) -> bool {
        !matches!(self, Self::Silent)
    }
}
