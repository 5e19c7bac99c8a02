use std::{fmt, str::FromStr};

use crate::ConfigError;

/// Selects the admission policy a node runs. Chosen once at setup.
///
/// Besides the names, the legacy numeric selector codes are accepted through
/// [`TryFrom<u32>`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PolicyKind {
    /// Dynamic thresholds.
    #[default]
    Dt,
    /// Flow-aware buffer.
    Fab,
    /// Complete sharing.
    Cs,
    /// Intelligent buffer: short-flow prioritisation with approximate fair dropping.
    Ib,
    /// Active buffer management.
    Abm,
    /// Adaptive probing controller.
    Adaptive,
}

impl PolicyKind {
    pub const ALL: [Self; 6] = [Self::Dt, Self::Fab, Self::Cs, Self::Ib, Self::Abm, Self::Adaptive];

    pub const fn code(self) -> u32 {
        match self {
            Self::Dt => 101,
            Self::Fab => 102,
            Self::Cs => 103,
            Self::Ib => 104,
            Self::Abm => 110,
            Self::Adaptive => 111,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Dt => "dt",
            Self::Fab => "fab",
            Self::Cs => "cs",
            Self::Ib => "ib",
            Self::Abm => "abm",
            Self::Adaptive => "adaptive",
        }
    }
}

impl TryFrom<u32> for PolicyKind {
    type Error = ConfigError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        Self::ALL.into_iter().find(|k| k.code() == code).ok_or(ConfigError::UnknownPolicy(code))
    }
}

impl FromStr for PolicyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        if let Some(kind) = Self::ALL.into_iter().find(|k| k.name() == name) {
            return Ok(kind);
        }

        match name.as_str() {
            "dpp" => Ok(Self::Ib),
            other => match other.parse::<u32>() {
                Ok(code) => Self::try_from(code),
                Err(_) => Err(ConfigError::UnknownPolicyName(s.to_owned())),
            },
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
