//! Value types exchanged with the hosting simulation.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable participant identity, independent of display name.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ParticipantId(Uuid);

impl ParticipantId {
    /// Allocates a fresh random identity.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Abbreviated form used when the display name is unknown.
    #[must_use]
    pub fn short(&self) -> String {
        let full = self.0.to_string();
        format!("{}...", &full[..8])
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Continuous world position.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    /// East/west axis
    pub x: f64,
    /// Vertical axis
    pub y: f64,
    /// North/south axis
    pub z: f64,
}

impl Vec3 {
    /// Creates a position from its coordinates.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to `other`.
    #[must_use]
    pub fn distance(&self, other: &Self) -> f64 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        dz.mul_add(dz, dx.mul_add(dx, dy * dy)).sqrt()
    }

    /// The block containing this position.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn block(&self) -> BlockPos {
        BlockPos::new(
            self.x.floor() as i32,
            self.y.floor() as i32,
            self.z.floor() as i32,
        )
    }
}

impl fmt::Display for Vec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1}, {:.1}, {:.1})", self.x, self.y, self.z)
    }
}

/// Integer block coordinate.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Default, Serialize, Deserialize)]
pub struct BlockPos {
    /// East/west axis
    pub x: i32,
    /// Vertical axis
    pub y: i32,
    /// North/south axis
    pub z: i32,
}

impl BlockPos {
    /// Creates a block coordinate.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance between block coordinates.
    #[must_use]
    pub fn distance(&self, other: &Self) -> f64 {
        let dx = f64::from(self.x) - f64::from(other.x);
        let dy = f64::from(self.y) - f64::from(other.y);
        let dz = f64::from(self.z) - f64::from(other.z);
        dz.mul_add(dz, dx.mul_add(dx, dy * dy)).sqrt()
    }

    /// Center of the block as a continuous position.
    #[must_use]
    pub fn center(&self) -> Vec3 {
        Vec3::new(
            f64::from(self.x) + 0.5,
            f64::from(self.y),
            f64::from(self.z) + 0.5,
        )
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// World dimension a participant or feature lives in.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// The surface world.
    #[default]
    Overworld,
    /// The nether.
    Nether,
    /// The end, where the win objective lives.
    End,
    /// Any dimension added by the host.
    Other(String),
}

impl Dimension {
    /// Namespaced identifier.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Overworld => "overworld",
            Self::Nether => "the_nether",
            Self::End => "the_end",
            Self::Other(name) => name,
        }
    }

    /// Name shown to participants.
    #[must_use]
    pub fn display_name(&self) -> &str {
        match self {
            Self::Overworld => "Overworld",
            Self::Nether => "Nether",
            Self::End => "The End",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Dimension {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        let key = key.strip_prefix("minecraft:").unwrap_or(&key);
        Ok(match key {
            "overworld" => Self::Overworld,
            "nether" | "the_nether" => Self::Nether,
            "end" | "the_end" => Self::End,
            other => Self::Other(other.to_owned()),
        })
    }
}

/// A connected participant as seen by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    /// Stable identity
    pub id: ParticipantId,
    /// Display name
    pub name: String,
    /// Last known position
    pub position: Vec3,
    /// Dimension the participant is in
    pub dimension: Dimension,
}

/// Interaction mode of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayMode {
    /// Normal play.
    #[default]
    Survival,
    /// Non-interactive observer.
    Spectator,
}

/// Kinds of timed status effects the coordinator applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    /// Obscures vision while held.
    Blindness,
    /// Movement penalty.
    Slowness,
    /// Block-breaking penalty.
    MiningFatigue,
    /// Cosmetic reward for the winner.
    HeroOfTheVillage,
    /// Outline visible through walls.
    Glowing,
}

/// A status effect with duration and strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusEffect {
    /// What the effect does
    pub kind: EffectKind,
    /// How long it lasts
    pub duration: Duration,
    /// Zero-based strength
    pub amplifier: u8,
}

impl StatusEffect {
    /// Creates an effect.
    #[must_use]
    pub const fn new(kind: EffectKind, duration: Duration, amplifier: u8) -> Self {
        Self {
            kind,
            duration,
            amplifier,
        }
    }
}

/// Audio cues played alongside notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundCue {
    /// Short click used for coarse milestones.
    Hat,
    /// Bell used for late milestones and preparation.
    Bell,
    /// High chime used for the final seconds.
    Pling,
    /// Fanfare at the start of a countdown.
    LevelUp,
    /// Firework at the end of a countdown.
    Firework,
    /// Challenge-complete jingle for a winner.
    Challenge,
}

/// A sound cue with pitch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sound {
    /// Which cue to play
    pub cue: SoundCue,
    /// Playback pitch, 1.0 is neutral
    pub pitch: f32,
}

/// Large on-screen title with an optional subtitle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Title {
    /// Main line
    pub headline: String,
    /// Secondary line
    pub subtitle: Option<String>,
}

/// A message delivered to participants: chat lines, an optional title
/// and an optional sound.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Notice {
    /// Chat lines, in order
    pub lines: Vec<String>,
    /// Title overlay
    pub title: Option<Title>,
    /// Accompanying sound
    pub sound: Option<Sound>,
}

impl Notice {
    /// A notice with a single chat line.
    #[must_use]
    pub fn chat(line: impl Into<String>) -> Self {
        Self {
            lines: vec![line.into()],
            ..Self::default()
        }
    }

    /// A notice with only a title.
    #[must_use]
    pub fn title(headline: impl Into<String>, subtitle: Option<&str>) -> Self {
        Self::default().with_title(headline, subtitle)
    }

    /// Appends a chat line.
    #[must_use]
    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    /// Sets the title overlay.
    #[must_use]
    pub fn with_title(mut self, headline: impl Into<String>, subtitle: Option<&str>) -> Self {
        self.title = Some(Title {
            headline: headline.into(),
            subtitle: subtitle.map(str::to_owned),
        });
        self
    }

    /// Sets the accompanying sound.
    #[must_use]
    pub fn with_sound(mut self, cue: SoundCue, pitch: f32) -> Self {
        self.sound = Some(Sound { cue, pitch });
        self
    }
}

/// Who receives a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Every online participant.
    Everyone,
    /// A single participant.
    Only(ParticipantId),
    /// Every online participant except one.
    AllExcept(ParticipantId),
}

impl Audience {
    /// Whether `id` is part of this audience.
    #[must_use]
    pub fn includes(&self, id: ParticipantId) -> bool {
        match self {
            Self::Everyone => true,
            Self::Only(target) => *target == id,
            Self::AllExcept(excluded) => *excluded != id,
        }
    }
}
