//! Bit-exact parsers for the seven ROM header families this service
//! recognizes. Each parser takes the bytes it needs (a prefix, or for
//! PSX a single sector read from deep inside the file) and returns a
//! best-effort [`HeaderInfo`]; fields the family doesn't define stay
//! `None` rather than being guessed at.

use common::error::AppError;
use platform_registry::PlatformId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderInfo {
    pub title: Option<String>,
    pub region: Option<String>,
    pub version: Option<String>,
    pub checksum_valid: Option<bool>,
}

/// Dispatches to the parser for `platform`. Callers are expected to have
/// already read enough of the file (see [`prefix_len`]/[`SNES_HEADER_OFFSETS`]);
/// a byte slice too short for the family's layout is an `UnsupportedFormat`.
pub fn parse(platform: PlatformId, bytes: &[u8]) -> Result<HeaderInfo, AppError> {
    match platform {
        PlatformId::Nes => parse_nes(bytes),
        PlatformId::Snes => parse_snes(bytes),
        PlatformId::N64 => parse_n64(bytes),
        PlatformId::Gb => parse_gb(bytes),
        PlatformId::Gba => parse_gba(bytes),
        PlatformId::Genesis => parse_genesis(bytes),
        PlatformId::Psx => parse_psx_sector(bytes),
    }
}

/// How many leading bytes of the assembled file each family's parser needs,
/// for families whose header sits at a fixed prefix offset. PSX instead
/// reads a single 2048-byte sector at `PSX_SECTOR_OFFSET` (see
/// [`probe_psx_sector`] in the assembling stage).
pub const fn prefix_len(platform: PlatformId) -> u64 {
    match platform {
        PlatformId::Nes => 16,
        PlatformId::Snes => 0x40C0 + 64, // covers all three mirrored offsets
        PlatformId::N64 => 63,
        PlatformId::Gb => 0x150,
        PlatformId::Gba => 0xB0,
        PlatformId::Genesis => 0x1F3,
        PlatformId::Psx => 0,
    }
}

fn ascii_trim(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

fn truthy(text: String) -> Option<String> {
    (!text.is_empty()).then_some(text)
}

fn parse_nes(bytes: &[u8]) -> Result<HeaderInfo, AppError> {
    if bytes.len() < 16 || &bytes[0..4] != b"NES\x1A" {
        return Err(AppError::UnsupportedFormat("missing iNES magic".into()));
    }
    let region = if bytes[6] & 0x01 == 0 { "NTSC" } else { "PAL" };
    Ok(HeaderInfo {
        title: None,
        region: Some(region.to_string()),
        version: None,
        checksum_valid: None,
    })
}

const SNES_HEADER_OFFSETS: [usize; 3] = [0x7FC0, 0xFFC0, 0x40C0];

fn parse_snes(bytes: &[u8]) -> Result<HeaderInfo, AppError> {
    for &offset in &SNES_HEADER_OFFSETS {
        if bytes.len() < offset + 32 {
            continue;
        }
        let title = ascii_trim(&bytes[offset..offset + 21]);
        let checksum = u16::from_le_bytes([bytes[offset + 28], bytes[offset + 29]]);
        let complement = u16::from_le_bytes([bytes[offset + 30], bytes[offset + 31]]);
        let checksum_valid = checksum ^ complement == 0xFFFF;
        if title.is_empty() && !checksum_valid {
            continue;
        }
        return Ok(HeaderInfo {
            title: truthy(title),
            region: None,
            version: None,
            checksum_valid: Some(checksum_valid),
        });
    }
    Err(AppError::UnsupportedFormat(
        "no SNES header found at any mirrored offset".into(),
    ))
}

fn parse_n64(bytes: &[u8]) -> Result<HeaderInfo, AppError> {
    if bytes.len() < 63 {
        return Err(AppError::UnsupportedFormat("truncated N64 header".into()));
    }
    let magic = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if magic != 0x8037_1240 {
        return Err(AppError::UnsupportedFormat("missing N64 big-endian magic".into()));
    }
    let title = ascii_trim(&bytes[32..52]);
    let game_code = ascii_trim(&bytes[59..63]);
    Ok(HeaderInfo {
        title: truthy(title),
        region: truthy(game_code),
        version: None,
        checksum_valid: None,
    })
}

fn parse_gb(bytes: &[u8]) -> Result<HeaderInfo, AppError> {
    if bytes.len() < 0x147 {
        return Err(AppError::UnsupportedFormat("truncated Game Boy header".into()));
    }
    let title = ascii_trim(&bytes[0x134..0x144]);
    let cgb_flag = bytes[0x143];
    let sgb_flag = bytes[0x146];
    let region = if matches!(cgb_flag, 0x80 | 0xC0) {
        "CGB"
    } else if sgb_flag == 0x03 {
        "SGB"
    } else {
        "DMG"
    };
    Ok(HeaderInfo {
        title: truthy(title),
        region: Some(region.to_string()),
        version: None,
        checksum_valid: None,
    })
}

fn parse_gba(bytes: &[u8]) -> Result<HeaderInfo, AppError> {
    if bytes.len() < 0xB0 {
        return Err(AppError::UnsupportedFormat("truncated GBA header".into()));
    }
    let title = ascii_trim(&bytes[0xA0..0xAC]);
    let game_code = ascii_trim(&bytes[0xAC..0xB0]);
    Ok(HeaderInfo {
        title: truthy(title),
        region: truthy(game_code),
        version: None,
        checksum_valid: None,
    })
}

fn parse_genesis(bytes: &[u8]) -> Result<HeaderInfo, AppError> {
    if bytes.len() < 0x1F3 {
        return Err(AppError::UnsupportedFormat("truncated Genesis header".into()));
    }
    if !bytes[0x100..0x110].windows(4).any(|w| w == b"SEGA") {
        return Err(AppError::UnsupportedFormat(
            "missing SEGA system tag".into(),
        ));
    }
    let title = ascii_trim(&bytes[0x150..0x190]);
    let region = ascii_trim(&bytes[0x1F0..0x1F3]);
    Ok(HeaderInfo {
        title: truthy(title),
        region: truthy(region),
        version: None,
        checksum_valid: None,
    })
}

/// PSX offset for its identifying ISO 9660 sector: unlike the other
/// families, this isn't a prefix read.
pub const PSX_SECTOR_OFFSET: u64 = 0x8000;
pub const PSX_SECTOR_LEN: u64 = 2048;

fn parse_psx_sector(sector: &[u8]) -> Result<HeaderInfo, AppError> {
    if sector.len() < 6 || &sector[1..6] != b"CD001" {
        return Err(AppError::UnsupportedFormat(
            "missing CD001 primary volume descriptor".into(),
        ));
    }
    Ok(HeaderInfo {
        title: None,
        region: None,
        version: None,
        checksum_valid: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nes_magic_required_and_region_flag_decoded() {
        let mut bytes = vec![0u8; 16];
        bytes[0..4].copy_from_slice(b"NES\x1A");
        bytes[6] = 0x01;
        let info = parse_nes(&bytes).expect("valid ines header");
        assert_eq!(info.region.as_deref(), Some("PAL"));

        bytes[6] = 0x00;
        let info = parse_nes(&bytes).expect("valid ines header");
        assert_eq!(info.region.as_deref(), Some("NTSC"));

        let bad = vec![0u8; 16];
        assert!(parse_nes(&bad).is_err());
    }

    fn snes_header_at(offset: usize, title: &str, valid_checksum: bool) -> Vec<u8> {
        let mut bytes = vec![0u8; offset + 32];
        let title_bytes = title.as_bytes();
        bytes[offset..offset + title_bytes.len()].copy_from_slice(title_bytes);
        let checksum: u16 = 0x1234;
        let complement = if valid_checksum { !checksum } else { 0 };
        bytes[offset + 28..offset + 30].copy_from_slice(&checksum.to_le_bytes());
        bytes[offset + 30..offset + 32].copy_from_slice(&complement.to_le_bytes());
        bytes
    }

    #[test]
    fn snes_checksum_complement_validated_at_each_mirror() {
        for &offset in &SNES_HEADER_OFFSETS {
            let bytes = snes_header_at(offset, "SUPER GAME", true);
            let info = parse_snes(&bytes).expect("header found");
            assert_eq!(info.title.as_deref(), Some("SUPER GAME"));
            assert_eq!(info.checksum_valid, Some(true));
        }
    }

    #[test]
    fn snes_invalid_checksum_surfaces_as_false_not_error() {
        let bytes = snes_header_at(0x7FC0, "GAME", false);
        let info = parse_snes(&bytes).expect("header found");
        assert_eq!(info.checksum_valid, Some(false));
    }

    #[test]
    fn n64_requires_big_endian_magic() {
        let mut bytes = vec![0u8; 63];
        bytes[0..4].copy_from_slice(&0x8037_1240u32.to_be_bytes());
        bytes[32..42].copy_from_slice(b"MARIO KART");
        bytes[59..63].copy_from_slice(b"NMKE");
        let info = parse_n64(&bytes).expect("valid n64 header");
        assert_eq!(info.title.as_deref(), Some("MARIO KART"));
        assert_eq!(info.region.as_deref(), Some("NMKE"));

        bytes[0] = 0;
        assert!(parse_n64(&bytes).is_err());
    }

    #[test]
    fn gb_cgb_and_sgb_flags_classify_region() {
        let mut bytes = vec![0u8; 0x147];
        bytes[0x134..0x144].copy_from_slice(b"POKEMON RED\0\0\0\0\0");
        bytes[0x143] = 0xC0;
        let info = parse_gb(&bytes).expect("header");
        assert_eq!(info.region.as_deref(), Some("CGB"));

        bytes[0x143] = 0x00;
        bytes[0x146] = 0x03;
        let info = parse_gb(&bytes).expect("header");
        assert_eq!(info.region.as_deref(), Some("SGB"));
    }

    #[test]
    fn gba_title_and_game_code_read() {
        let mut bytes = vec![0u8; 0xB0];
        bytes[0xA0..0xA8].copy_from_slice(b"ZELDA\0\0\0");
        bytes[0xAC..0xB0].copy_from_slice(b"AZLE");
        let info = parse_gba(&bytes).expect("header");
        assert_eq!(info.title.as_deref(), Some("ZELDA"));
        assert_eq!(info.region.as_deref(), Some("AZLE"));
    }

    #[test]
    fn genesis_requires_sega_tag_in_system_region() {
        let mut bytes = vec![0u8; 0x1F3];
        bytes[0x100..0x104].copy_from_slice(b"SEGA");
        bytes[0x150..0x160].copy_from_slice(b"SONIC THE HEDGEHOG\0\0");
        bytes[0x1F0..0x1F3].copy_from_slice(b"U  ");
        let info = parse_genesis(&bytes).expect("header");
        assert_eq!(info.title.as_deref(), Some("SONIC THE HEDGEHOG"));

        let mut untagged = vec![0u8; 0x1F3];
        untagged[0x150..0x154].copy_from_slice(b"GAME");
        assert!(parse_genesis(&untagged).is_err());
    }

    #[test]
    fn psx_sector_requires_cd001_descriptor() {
        let mut sector = vec![0u8; 2048];
        sector[1..6].copy_from_slice(b"CD001");
        assert!(parse_psx_sector(&sector).is_ok());

        let bad = vec![0u8; 2048];
        assert!(parse_psx_sector(&bad).is_err());
    }

    #[test]
    fn dispatch_routes_to_the_right_family() {
        let mut nes = vec![0u8; 16];
        nes[0..4].copy_from_slice(b"NES\x1A");
        assert!(parse(PlatformId::Nes, &nes).is_ok());
    }
}
