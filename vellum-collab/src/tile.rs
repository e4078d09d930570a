//! Tile descriptor parsed from a `tile:` message header.
//!
//! A tile header is a single line of whitespace-separated `key=value`
//! pairs:
//!
//! ```text
//! tile: nviewid=0 part=0 width=256 height=256 tileposx=0 tileposy=3840
//!       tilewidth=3840 tileheight=3840 ver=12
//! ```
//!
//! Two descriptors compare equal when they address the same tile
//! *position* (view, part, mode, pixel size, document position and area);
//! the render version `ver` is deliberately excluded, so a newer render of
//! the same tile supersedes an older one under queue deduplication.

use std::hash::{Hash, Hasher};

/// Structured description of one rendered tile.
#[derive(Debug, Clone)]
pub struct TileDesc {
    pub normalized_view_id: u32,
    pub part: i32,
    pub mode: u32,
    pub width: u32,
    pub height: u32,
    pub tile_pos_x: i32,
    pub tile_pos_y: i32,
    pub tile_width: i32,
    pub tile_height: i32,
    /// Render version; not part of equality or the position hash.
    pub ver: i32,
}

impl PartialEq for TileDesc {
    fn eq(&self, other: &Self) -> bool {
        self.normalized_view_id == other.normalized_view_id
            && self.part == other.part
            && self.mode == other.mode
            && self.width == other.width
            && self.height == other.height
            && self.tile_pos_x == other.tile_pos_x
            && self.tile_pos_y == other.tile_pos_y
            && self.tile_width == other.tile_width
            && self.tile_height == other.tile_height
    }
}

impl Eq for TileDesc {}

impl TileDesc {
    /// Parse a tile header line. A leading `tile:` token is accepted and
    /// skipped; unknown keys are ignored so the format can grow.
    pub fn parse(line: &str) -> Result<Self, TileParseError> {
        let mut normalized_view_id = 0u32;
        let mut part: Option<i32> = None;
        let mut mode = 0u32;
        let mut width: Option<u32> = None;
        let mut height: Option<u32> = None;
        let mut tile_pos_x: Option<i32> = None;
        let mut tile_pos_y: Option<i32> = None;
        let mut tile_width: Option<i32> = None;
        let mut tile_height: Option<i32> = None;
        let mut ver = -1i32;

        fn num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, TileParseError> {
            value.parse().map_err(|_| TileParseError::BadValue {
                key: key.to_string(),
                value: value.to_string(),
            })
        }

        fn require<T>(field: Option<T>, name: &'static str) -> Result<T, TileParseError> {
            field.ok_or(TileParseError::MissingField(name))
        }

        for token in line.split_ascii_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                // The command token itself, typically.
                continue;
            };

            match key {
                "nviewid" => normalized_view_id = num(key, value)?,
                "part" => part = Some(num(key, value)?),
                "mode" => mode = num(key, value)?,
                "width" => width = Some(num(key, value)?),
                "height" => height = Some(num(key, value)?),
                "tileposx" => tile_pos_x = Some(num(key, value)?),
                "tileposy" => tile_pos_y = Some(num(key, value)?),
                "tilewidth" => tile_width = Some(num(key, value)?),
                "tileheight" => tile_height = Some(num(key, value)?),
                "ver" => ver = num(key, value)?,
                _ => {}
            }
        }

        Ok(Self {
            normalized_view_id,
            part: require(part, "part")?,
            mode,
            width: require(width, "width")?,
            height: require(height, "height")?,
            tile_pos_x: require(tile_pos_x, "tileposx")?,
            tile_pos_y: require(tile_pos_y, "tileposy")?,
            tile_width: require(tile_width, "tilewidth")?,
            tile_height: require(tile_height, "tileheight")?,
            ver,
        })
    }

    /// Stable hash over exactly the fields equality compares.
    ///
    /// Cached on queue items so dedup scans compare one `u32` per resident
    /// instead of re-parsing every tile header.
    pub fn position_hash(&self) -> u32 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.normalized_view_id.hash(&mut hasher);
        self.part.hash(&mut hasher);
        self.mode.hash(&mut hasher);
        self.width.hash(&mut hasher);
        self.height.hash(&mut hasher);
        self.tile_pos_x.hash(&mut hasher);
        self.tile_pos_y.hash(&mut hasher);
        self.tile_width.hash(&mut hasher);
        self.tile_height.hash(&mut hasher);
        hasher.finish() as u32
    }

    /// Render back to header form, for log messages.
    pub fn serialize(&self) -> String {
        let mut out = format!(
            "nviewid={} part={} width={} height={} tileposx={} tileposy={} tilewidth={} tileheight={}",
            self.normalized_view_id,
            self.part,
            self.width,
            self.height,
            self.tile_pos_x,
            self.tile_pos_y,
            self.tile_width,
            self.tile_height,
        );
        if self.mode != 0 {
            out.push_str(&format!(" mode={}", self.mode));
        }
        if self.ver >= 0 {
            out.push_str(&format!(" ver={}", self.ver));
        }
        out
    }
}

/// Tile header parse errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileParseError {
    /// A required `key=value` pair was absent
    MissingField(&'static str),
    /// A value failed to parse as a number
    BadValue { key: String, value: String },
}

impl std::fmt::Display for TileParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TileParseError::MissingField(name) => write!(f, "Missing tile field: {name}"),
            TileParseError::BadValue { key, value } => {
                write!(f, "Bad tile value: {key}={value}")
            }
        }
    }
}

impl std::error::Error for TileParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "tile: nviewid=0 part=0 width=256 height=256 tileposx=0 tileposy=0 tilewidth=3840 tileheight=3840 ver=5";

    #[test]
    fn test_parse_full_header() {
        let tile = TileDesc::parse(HEADER).unwrap();
        assert_eq!(tile.part, 0);
        assert_eq!(tile.width, 256);
        assert_eq!(tile.height, 256);
        assert_eq!(tile.tile_pos_x, 0);
        assert_eq!(tile.tile_pos_y, 0);
        assert_eq!(tile.tile_width, 3840);
        assert_eq!(tile.tile_height, 3840);
        assert_eq!(tile.ver, 5);
    }

    #[test]
    fn test_parse_defaults() {
        let tile = TileDesc::parse(
            "tile: part=1 width=256 height=256 tileposx=3840 tileposy=0 tilewidth=3840 tileheight=3840",
        )
        .unwrap();
        assert_eq!(tile.normalized_view_id, 0);
        assert_eq!(tile.mode, 0);
        assert_eq!(tile.ver, -1);
    }

    #[test]
    fn test_parse_ignores_unknown_keys() {
        let line = format!("{HEADER} imgsize=1234 wid=9 oldwid=8");
        assert!(TileDesc::parse(&line).is_ok());
    }

    #[test]
    fn test_parse_missing_field() {
        let err = TileDesc::parse("tile: part=0 width=256 height=256").unwrap_err();
        assert!(matches!(err, TileParseError::MissingField(_)));
    }

    #[test]
    fn test_parse_bad_value() {
        let err = TileDesc::parse(
            "tile: part=zero width=256 height=256 tileposx=0 tileposy=0 tilewidth=1 tileheight=1",
        )
        .unwrap_err();
        assert!(matches!(err, TileParseError::BadValue { .. }));
    }

    #[test]
    fn test_equality_ignores_version() {
        let a = TileDesc::parse(HEADER).unwrap();
        let mut b = a.clone();
        b.ver = 99;
        assert_eq!(a, b);
    }

    #[test]
    fn test_inequality_on_position() {
        let a = TileDesc::parse(HEADER).unwrap();
        let mut b = a.clone();
        b.tile_pos_x = 3840;
        assert_ne!(a, b);
    }

    #[test]
    fn test_position_hash_matches_equality() {
        let a = TileDesc::parse(HEADER).unwrap();
        let mut newer = a.clone();
        newer.ver = 42;
        assert_eq!(a.position_hash(), newer.position_hash());

        let mut moved = a.clone();
        moved.tile_pos_y = 3840;
        assert_ne!(a.position_hash(), moved.position_hash());
    }

    #[test]
    fn test_serialize_roundtrips() {
        let tile = TileDesc::parse(HEADER).unwrap();
        let reparsed = TileDesc::parse(&tile.serialize()).unwrap();
        assert_eq!(tile, reparsed);
        assert_eq!(tile.ver, reparsed.ver);
    }
}
