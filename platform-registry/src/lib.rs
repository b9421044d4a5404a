//! Static classification data for the handful of console platforms this
//! service understands: extension-based guesses, per-platform size caps,
//! and archive-extension detection. Binary header parsing itself lives
//! in `assembler-pipeline`, which is the only component that needs to
//! read file bytes; this crate only knows about names and declared sizes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformId {
    Nes,
    Snes,
    N64,
    Gb,
    Gba,
    Genesis,
    Psx,
}

impl PlatformId {
    pub const ALL: [Self; 7] = [
        Self::Nes,
        Self::Snes,
        Self::N64,
        Self::Gb,
        Self::Gba,
        Self::Genesis,
        Self::Psx,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Nes => "nes",
            Self::Snes => "snes",
            Self::N64 => "n64",
            Self::Gb => "gb",
            Self::Gba => "gba",
            Self::Genesis => "genesis",
            Self::Psx => "psx",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str().eq_ignore_ascii_case(value))
    }
}

impl std::fmt::Display for PlatformId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PlatformSpec {
    pub id: PlatformId,
    pub display_name: &'static str,
    /// Hard cap on accepted content size (section 3/section 4.4 "OversizeForPlatform").
    pub max_size: u64,
    pub extensions: &'static [&'static str],
}

const MIB: u64 = 1024 * 1024;

const SPECS: [PlatformSpec; 7] = [
    PlatformSpec {
        id: PlatformId::Nes,
        display_name: "Nintendo Entertainment System",
        max_size: 8 * MIB,
        extensions: &["nes"],
    },
    PlatformSpec {
        id: PlatformId::Snes,
        display_name: "Super Nintendo Entertainment System",
        max_size: 8 * MIB,
        extensions: &["sfc", "smc"],
    },
    PlatformSpec {
        id: PlatformId::N64,
        display_name: "Nintendo 64",
        max_size: 64 * MIB,
        extensions: &["n64", "z64", "v64"],
    },
    PlatformSpec {
        id: PlatformId::Gb,
        display_name: "Game Boy / Game Boy Color",
        max_size: 8 * MIB,
        extensions: &["gb", "gbc"],
    },
    PlatformSpec {
        id: PlatformId::Gba,
        display_name: "Game Boy Advance",
        max_size: 32 * MIB,
        extensions: &["gba"],
    },
    PlatformSpec {
        id: PlatformId::Genesis,
        display_name: "Sega Genesis / Mega Drive",
        max_size: 8 * MIB,
        extensions: &["md", "gen", "smd"],
    },
    PlatformSpec {
        id: PlatformId::Psx,
        display_name: "PlayStation",
        max_size: 900 * MIB,
        extensions: &["iso", "bin", "cue"],
    },
];

const ARCHIVE_EXTENSIONS: [&str; 3] = ["zip", "7z", "rar"];

/// Looks up the static spec for a platform.
pub fn spec(id: PlatformId) -> PlatformSpec {
    SPECS
        .into_iter()
        .find(|s| s.id == id)
        .unwrap_or_else(|| unreachable!("every PlatformId has a spec entry"))
}

/// The hard size cap for a platform, per section 4.4's `OversizeForPlatform` check.
pub fn max_size(id: PlatformId) -> u64 {
    spec(id).max_size
}

fn extension_of(name: &str) -> Option<String> {
    name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())
}

/// Guesses a platform from a file name's extension. Returns `None` for
/// unrecognized or archive extensions; archive contents are classified
/// after extraction, not from the archive's own name.
pub fn classify_by_extension(name: &str) -> Option<PlatformId> {
    let ext = extension_of(name)?;
    SPECS
        .iter()
        .find(|s| s.extensions.contains(&ext.as_str()))
        .map(|s| s.id)
}

/// Whether `name`'s extension marks it as a container this service knows
/// how to unwrap before classification (currently only `.zip` is actually
/// extracted; `.7z`/`.rar` are recognized so they surface `UnsupportedFormat`
/// instead of `NoRecognizedContent`).
pub fn is_archive(name: &str) -> bool {
    extension_of(name).is_some_and(|ext| ARCHIVE_EXTENSIONS.contains(&ext.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_extensions_case_insensitively() {
        assert_eq!(classify_by_extension("Super Mario.NES"), Some(PlatformId::Nes));
        assert_eq!(classify_by_extension("game.sfc"), Some(PlatformId::Snes));
        assert_eq!(classify_by_extension("game.z64"), Some(PlatformId::N64));
    }

    #[test]
    fn unknown_extension_returns_none() {
        assert_eq!(classify_by_extension("readme.txt"), None);
        assert_eq!(classify_by_extension("no_extension"), None);
    }

    #[test]
    fn archive_extensions_detected_but_not_classified_as_a_platform() {
        assert!(is_archive("bundle.zip"));
        assert!(is_archive("bundle.7z"));
        assert!(!is_archive("game.nes"));
        assert_eq!(classify_by_extension("bundle.zip"), None);
    }

    #[test]
    fn every_platform_has_a_positive_size_cap() {
        for platform in PlatformId::ALL {
            assert!(max_size(platform) > 0);
        }
    }

    #[test]
    fn round_trips_through_as_str_and_parse() {
        for platform in PlatformId::ALL {
            assert_eq!(PlatformId::parse(platform.as_str()), Some(platform));
        }
        assert_eq!(PlatformId::parse("totally-unknown"), None);
    }
}
