use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sector {
    Cement,
    IronSteel,
    Textiles,
}

/// Keyword table used to pick a sector out of free text. Order matters:
/// the first keyword found in the message wins.
const SECTOR_KEYWORDS: &[(&str, Sector)] = &[
    ("cement", Sector::Cement),
    ("clinker", Sector::Cement),
    ("iron_steel", Sector::IronSteel),
    ("iron & steel", Sector::IronSteel),
    ("iron and steel", Sector::IronSteel),
    ("steel", Sector::IronSteel),
    ("blast furnace", Sector::IronSteel),
    ("textile", Sector::Textiles),
    ("fabric", Sector::Textiles),
    ("garment", Sector::Textiles),
    ("apparel", Sector::Textiles),
];

impl Sector {
    pub const ALL: [Sector; 3] = [Sector::Cement, Sector::IronSteel, Sector::Textiles];

    pub fn code(self) -> &'static str {
        match self {
            Self::Cement => "cement",
            Self::IronSteel => "iron_steel",
            Self::Textiles => "textiles",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Cement => "Cement",
            Self::IronSteel => "Iron & Steel",
            Self::Textiles => "Textiles",
        }
    }

    pub fn detect(message: &str) -> Option<Self> {
        let normalized = message.to_lowercase();
        SECTOR_KEYWORDS
            .iter()
            .find(|(keyword, _)| normalized.contains(keyword))
            .map(|(_, sector)| *sector)
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Sector {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|sector| sector.code() == normalized)
            .ok_or_else(|| DomainError::UnknownSector(value.trim().to_string()))
    }
}
