//! The fixed team palette.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// One of the seven team colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamColor {
    /// Red team
    Red,
    /// Orange team
    Orange,
    /// Yellow team
    Yellow,
    /// Green team
    Green,
    /// Cyan team
    Cyan,
    /// Blue team
    Blue,
    /// Purple team
    Purple,
}

impl TeamColor {
    /// Every color, in display order.
    pub const ALL: [Self; 7] = [
        Self::Red,
        Self::Orange,
        Self::Yellow,
        Self::Green,
        Self::Cyan,
        Self::Blue,
        Self::Purple,
    ];

    /// Identifier used in commands.
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Orange => "orange",
            Self::Yellow => "yellow",
            Self::Green => "green",
            Self::Cyan => "cyan",
            Self::Blue => "blue",
            Self::Purple => "purple",
        }
    }

    /// Name shown to participants.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Red => "Red",
            Self::Orange => "Orange",
            Self::Yellow => "Yellow",
            Self::Green => "Green",
            Self::Cyan => "Cyan",
            Self::Blue => "Blue",
            Self::Purple => "Purple",
        }
    }

    /// Chat formatting code.
    #[must_use]
    pub const fn color_code(self) -> &'static str {
        match self {
            Self::Red => "§c",
            Self::Orange => "§6",
            Self::Yellow => "§e",
            Self::Green => "§a",
            Self::Cyan => "§b",
            Self::Blue => "§9",
            Self::Purple => "§d",
        }
    }

    /// Closest color name understood by the host scoreboard.
    #[must_use]
    pub const fn scoreboard_color(self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Orange => "gold",
            Self::Yellow => "yellow",
            Self::Green => "green",
            Self::Cyan => "aqua",
            Self::Blue => "blue",
            Self::Purple => "light_purple",
        }
    }

    /// Scoreboard team name mirrored on the host.
    #[must_use]
    pub fn scoreboard_team(self) -> String {
        format!("team_{}", self.id())
    }
}

impl fmt::Display for TeamColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for TeamColor {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        if let Some(color) = Self::ALL.into_iter().find(|c| c.id() == wanted) {
            return Ok(color);
        }
        let valid = Self::ALL.map(Self::id).join(", ");
        let hint = suggest(&wanted)
            .map(|c| format!(" (did you mean '{c}'?)"))
            .unwrap_or_default();
        Err(SessionError::InvalidArgument(format!(
            "unknown team color '{s}'{hint}; valid colors: {valid}"
        )))
    }
}

/// Nearest color name within edit distance 3.
fn suggest(input: &str) -> Option<TeamColor> {
    TeamColor::ALL
        .into_iter()
        .map(|c| (strsim::damerau_levenshtein(input, c.id()), c))
        .filter(|(d, _)| *d <= 3)
        .min_by_key(|(d, _)| *d)
        .map(|(_, c)| c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_color_case_insensitively() {
        for color in TeamColor::ALL {
            assert_eq!(color.id().to_uppercase().parse::<TeamColor>().unwrap(), color);
        }
    }

    #[test]
    fn unknown_color_suggests_nearest() {
        let err = "purpel".parse::<TeamColor>().unwrap_err();
        let SessionError::InvalidArgument(msg) = err else {
            panic!("expected InvalidArgument");
        };
        assert!(msg.contains("did you mean 'purple'"), "{msg}");
        assert!(msg.contains("red, orange"));
    }

    #[test]
    fn far_off_color_has_no_suggestion() {
        let SessionError::InvalidArgument(msg) = "magenta".parse::<TeamColor>().unwrap_err() else {
            panic!("expected InvalidArgument");
        };
        assert!(!msg.contains("did you mean"));
    }

    #[test]
    fn scoreboard_mapping() {
        assert_eq!(TeamColor::Orange.scoreboard_color(), "gold");
        assert_eq!(TeamColor::Cyan.scoreboard_color(), "aqua");
        assert_eq!(TeamColor::Purple.scoreboard_team(), "team_purple");
    }
}
