use serde::{Deserialize, Serialize};

/// Puzzle difficulty, levels 1 through 5. Serialized as the bare level
/// number on the wire and in the database.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Difficulty {
    D1,
    D2,
    D3,
    D4,
    D5,
}

impl Difficulty {
    pub fn level(&self) -> u8 {
        match self {
            Difficulty::D1 => 1,
            Difficulty::D2 => 2,
            Difficulty::D3 => 3,
            Difficulty::D4 => 4,
            Difficulty::D5 => 5,
        }
    }

    pub fn from_level(level: u8) -> Option<Difficulty> {
        match level {
            1 => Some(Difficulty::D1),
            2 => Some(Difficulty::D2),
            3 => Some(Difficulty::D3),
            4 => Some(Difficulty::D4),
            5 => Some(Difficulty::D5),
            _ => None,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Difficulty::D1 => "Beginner",
            Difficulty::D2 => "Easy",
            Difficulty::D3 => "Medium",
            Difficulty::D4 => "Hard",
            Difficulty::D5 => "Expert",
        }
    }

    /// Recommended rating band for players facing this difficulty.
    pub fn rating_range(&self) -> (i32, i32) {
        match self {
            Difficulty::D1 => (0, 1200),
            Difficulty::D2 => (1000, 1700),
            Difficulty::D3 => (1500, 2200),
            Difficulty::D4 => (2000, 2700),
            Difficulty::D5 => (2500, 3000),
        }
    }

    /// The highest difficulty whose band contains `rating`. Ratings above
    /// every band map to D5, below to D1.
    pub fn for_rating(rating: i32) -> Difficulty {
        Difficulty::all()
            .iter()
            .rev()
            .find(|d| {
                let (min, max) = d.rating_range();
                min <= rating && rating <= max
            })
            .copied()
            .unwrap_or(if rating > 3000 {
                Difficulty::D5
            } else {
                Difficulty::D1
            })
    }

    pub fn all() -> &'static [Difficulty] {
        &[
            Difficulty::D1,
            Difficulty::D2,
            Difficulty::D3,
            Difficulty::D4,
            Difficulty::D5,
        ]
    }
}

impl From<Difficulty> for u8 {
    fn from(d: Difficulty) -> u8 {
        d.level()
    }
}

impl TryFrom<u8> for Difficulty {
    type Error = String;

    fn try_from(level: u8) -> Result<Difficulty, Self::Error> {
        Difficulty::from_level(level).ok_or_else(|| format!("difficulty out of range: {}", level))
    }
}
