use std::fmt;
use std::str::FromStr;

use dualwrite_core::{Operation, Role};
use serde::{Deserialize, Serialize};

use crate::{Mode1, Mode2, Mode3, Mode4};

/// Migration phase selected per resource type. Phases advance 1 → 4:
/// legacy only, legacy primary, unified primary, unified only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Mode {
    One,
    Two,
    Three,
    Four,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid dual-write mode {0:?}: expected 1, 2, 3 or 4")]
pub struct InvalidMode(pub String);

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::One, Mode::Two, Mode::Three, Mode::Four];

    pub fn number(self) -> u8 {
        match self {
            Mode::One => 1,
            Mode::Two => 2,
            Mode::Three => 3,
            Mode::Four => 4,
        }
    }

    /// Static label for metrics.
    pub fn label(self) -> &'static str {
        match self {
            Mode::One => "1",
            Mode::Two => "2",
            Mode::Three => "3",
            Mode::Four => "4",
        }
    }

    pub fn strategy(self) -> &'static dyn ModeStrategy {
        match self {
            Mode::One => &Mode1,
            Mode::Two => &Mode2,
            Mode::Three => &Mode3,
            Mode::Four => &Mode4,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.number()) }
}

impl TryFrom<u8> for Mode {
    type Error = InvalidMode;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Mode::One),
            2 => Ok(Mode::Two),
            3 => Ok(Mode::Three),
            4 => Ok(Mode::Four),
            other => Err(InvalidMode(other.to_string())),
        }
    }
}

impl From<Mode> for u8 {
    fn from(m: Mode) -> u8 { m.number() }
}

impl FromStr for Mode {
    type Err = InvalidMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let n: u8 = trimmed.parse().map_err(|_| InvalidMode(trimmed.to_string()))?;
        Mode::try_from(n)
    }
}

/// Routing policy of one migration phase.
pub trait ModeStrategy: Send + Sync + fmt::Debug {
    fn mode(&self) -> Mode;

    /// The only adapter Get and List are served from.
    fn read_adapter(&self) -> Role;

    /// Adapters a write is attempted on, authoritative first.
    fn write_order(&self) -> &'static [Role];

    /// Whether a failure of `role` while acting as mirror fails the request.
    fn is_mirror_failure_fatal(&self, role: Role) -> bool;

    fn mirrors_writes(&self) -> bool { self.write_order().len() > 1 }

    /// Adapters that must support `op` under this mode.
    fn required_roles(&self, op: Operation) -> Vec<Role> {
        if op.is_read() {
            vec![self.read_adapter()]
        } else {
            self.write_order().to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numbers_only_in_range() {
        assert_eq!("3".parse::<Mode>().unwrap(), Mode::Three);
        assert_eq!(" 1 ".parse::<Mode>().unwrap(), Mode::One);
        assert!("0".parse::<Mode>().is_err());
        assert!("5".parse::<Mode>().is_err());
        assert!("two".parse::<Mode>().is_err());
    }

    #[test]
    fn write_order_leads_with_read_source() {
        for mode in Mode::ALL {
            let s = mode.strategy();
            assert_eq!(s.mode(), mode);
            assert_eq!(s.write_order()[0], s.read_adapter(), "mode {mode}");
            for role in [Role::Source, Role::Target] {
                assert!(!s.is_mirror_failure_fatal(role));
            }
        }
    }

    #[test]
    fn reads_require_only_the_read_adapter() {
        let s = Mode::Two.strategy();
        assert_eq!(s.required_roles(Operation::Get), vec![Role::Source]);
        assert_eq!(s.required_roles(Operation::Create), vec![Role::Source, Role::Target]);
        assert_eq!(Mode::Four.strategy().required_roles(Operation::Delete), vec![Role::Target]);
    }

    #[test]
    fn serde_uses_plain_numbers() {
        let m: Mode = serde_yaml::from_str("4").unwrap();
        assert_eq!(m, Mode::Four);
        assert!(serde_yaml::from_str::<Mode>("9").is_err());
        assert_eq!(serde_yaml::to_string(&Mode::Two).unwrap().trim(), "2");
    }
}
