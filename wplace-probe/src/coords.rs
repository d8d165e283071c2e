//! Tile/pixel addressing and the pixel-edit records held by the captured map

use crate::errors::ProbeError;
use crate::intercept::MapHandle;
use crate::value::HostValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::trace;

/// Pixels per tile side.
pub const TILE_SIZE: u32 = 1000;

/// Coarse tile index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord(pub u32, pub u32);

/// Pixel offset inside a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelCoord(pub u32, pub u32);

/// Absolute pixel position: `tile * TILE_SIZE + pixel` on each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlobalPixel {
    pub x: u64,
    pub y: u64,
}

impl GlobalPixel {
    pub fn new(x: u64, y: u64) -> Self {
        Self { x, y }
    }

    pub fn from_parts(tile: TileCoord, pixel: PixelCoord) -> Self {
        let size = u64::from(TILE_SIZE);
        Self {
            x: u64::from(tile.0) * size + u64::from(pixel.0),
            y: u64::from(tile.1) * size + u64::from(pixel.1),
        }
    }

    /// Tile and in-tile offset. `None` when the tile index does not fit a
    /// [`TileCoord`].
    pub fn split(self) -> Option<(TileCoord, PixelCoord)> {
        let size = u64::from(TILE_SIZE);
        let tile = TileCoord(
            u32::try_from(self.x / size).ok()?,
            u32::try_from(self.y / size).ok()?,
        );
        // Always below TILE_SIZE.
        let pixel = PixelCoord((self.x % size) as u32, (self.y % size) as u32);
        Some((tile, pixel))
    }
}

/// Key of a pixel-edit entry: `t=(X,Y);p=(X,Y);s=S`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelKey {
    pub tile: TileCoord,
    pub pixel: PixelCoord,
    pub season: u32,
}

impl PixelKey {
    pub fn global(&self) -> GlobalPixel {
        GlobalPixel::from_parts(self.tile, self.pixel)
    }
}

impl fmt::Display for PixelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "t=({},{});p=({},{});s={}",
            self.tile.0, self.tile.1, self.pixel.0, self.pixel.1, self.season
        )
    }
}

impl FromStr for PixelKey {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProbeError::InvalidKey(s.to_string());
        let mut parts = s.split(';');
        let (tile, pixel, season) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(t), Some(p), Some(season), None) => (t, p, season),
            _ => return Err(invalid()),
        };
        let (tx, ty) = parse_pair(tile, "t=").ok_or_else(invalid)?;
        let (px, py) = parse_pair(pixel, "p=").ok_or_else(invalid)?;
        if px >= TILE_SIZE || py >= TILE_SIZE {
            return Err(invalid());
        }
        let season = season
            .strip_prefix("s=")
            .and_then(|n| n.parse().ok())
            .ok_or_else(invalid)?;
        Ok(PixelKey {
            tile: TileCoord(tx, ty),
            pixel: PixelCoord(px, py),
            season,
        })
    }
}

fn parse_pair(part: &str, prefix: &str) -> Option<(u32, u32)> {
    let inner = part.strip_prefix(prefix)?.strip_prefix('(')?.strip_suffix(')')?;
    let (a, b) = inner.split_once(',')?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }
}

/// One pending pixel edit, as the host stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRecord {
    pub color: Rgba,
    pub tile: TileCoord,
    pub pixel: PixelCoord,
    pub season: u32,
    #[serde(rename = "colorIdx")]
    pub color_idx: u32,
}

impl PixelRecord {
    pub fn key(&self) -> PixelKey {
        PixelKey {
            tile: self.tile,
            pixel: self.pixel,
            season: self.season,
        }
    }

    pub fn to_host(&self) -> Result<HostValue, ProbeError> {
        Ok(HostValue::from(serde_json::to_value(self)?))
    }

    pub fn from_host(value: &HostValue) -> Result<Self, ProbeError> {
        Ok(serde_json::from_value(value.to_json())?)
    }
}

impl MapHandle {
    /// Entries that look like pixel edits. Anything whose key or value does
    /// not parse is skipped.
    pub fn pixel_records(&self) -> Vec<(PixelKey, PixelRecord)> {
        let mut records: Vec<(PixelKey, PixelRecord)> = self
            .entries()
            .into_iter()
            .filter_map(|(key, value)| {
                let key: PixelKey = key.as_str()?.parse().ok()?;
                match PixelRecord::from_host(&value) {
                    Ok(record) => Some((key, record)),
                    Err(e) => {
                        trace!(%key, error = %e, "Skipping entry that is not a pixel record");
                        None
                    }
                }
            })
            .collect();
        records.sort_by_key(|(key, _)| (key.season, key.global().y, key.global().x));
        records
    }

    pub fn pixel(&self, key: &PixelKey) -> Option<PixelRecord> {
        let value = self.get(&HostValue::from(key.to_string()))?;
        PixelRecord::from_host(&value).ok()
    }

    /// Write `record` under its canonical key. Returns the previous value.
    pub fn stage_pixel(&self, record: &PixelRecord) -> Result<Option<HostValue>, ProbeError> {
        let value = record.to_host()?;
        Ok(self.set(HostValue::from(record.key().to_string()), value))
    }
}
