use std::collections::HashMap;
use std::fmt::Write as _;

use anyhow::{Context, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::warn;
use ttf_parser::{Face, GlyphId, OutlineBuilder};

/// Hash assigned to glyphs that carry no outline at all.
pub const EMPTY_OUTLINE: &str = "empty";

const DEFAULT_MAP: &str = include_str!("../data/glyph_map.json");
const PLACEHOLDER_LEN: usize = 4;

#[derive(Deserialize)]
struct MapFile {
    version: String,
    glyphs: HashMap<String, String>,
}

/// Curated outline-hash → plaintext table for the site's obfuscation font.
///
/// The site serves a per-page TTF whose cmap assigns scrambled code points
/// to real digit/character outlines, so the code point itself is useless;
/// the outline is the only stable identity. Unknown hashes are logged for
/// curation and replaced with a bracketed hash fragment, never guessed.
pub struct GlyphMap {
    version: String,
    known: HashMap<String, String>,
}

impl GlyphMap {
    /// Load the mapping resource: an explicit file when configured, the
    /// embedded table otherwise.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let raw = match path {
            Some(p) => std::fs::read_to_string(p)
                .with_context(|| format!("failed to read glyph map {p}"))?,
            None => DEFAULT_MAP.to_string(),
        };
        let file: MapFile =
            serde_json::from_str(&raw).context("glyph map is not valid JSON")?;
        Ok(Self {
            version: file.version,
            known: file.glyphs,
        })
    }

    #[cfg(test)]
    pub fn from_table(known: HashMap<String, String>) -> Self {
        Self {
            version: "test".into(),
            known,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Substitute obfuscated characters in `text` using the font's cmap and
    /// the known-hash table. Characters the font does not remap pass through
    /// unchanged, as does the whole string when no font is present or the
    /// font fails to parse.
    pub fn decode(&self, font_bytes: Option<&[u8]>, text: &str) -> String {
        let Some(bytes) = font_bytes else {
            return text.to_string();
        };
        if text.is_empty() {
            return text.to_string();
        }
        let face = match Face::parse(bytes, 0) {
            Ok(face) => face,
            Err(e) => {
                warn!("font parse failed, passing text through: {e}");
                return text.to_string();
            }
        };

        let mut out = String::with_capacity(text.len());
        for ch in text.chars() {
            match face.glyph_index(ch) {
                Some(gid) => out.push_str(&self.map_glyph(ch, &glyph_hash(&face, gid))),
                None => out.push(ch),
            }
        }
        out
    }

    /// Resolve one glyph hash: a known mapping, or a `[hash]` placeholder so
    /// an unmapped glyph can never masquerade as a plausible digit.
    fn map_glyph(&self, ch: char, hash: &str) -> String {
        match self.known.get(hash) {
            Some(plain) => plain.clone(),
            None => {
                warn!(glyph = %ch, hash, "unknown font glyph");
                format!("[{}]", &hash[..PLACEHOLDER_LEN.min(hash.len())])
            }
        }
    }
}

/// Content hash of a glyph's outline, independent of its code point.
fn glyph_hash(face: &Face, gid: GlyphId) -> String {
    let mut sink = OutlineOps::default();
    match face.outline_glyph(gid, &mut sink) {
        Some(_) if !sink.ops.is_empty() => format!("{:x}", Sha256::digest(sink.ops.as_bytes())),
        _ => EMPTY_OUTLINE.to_string(),
    }
}

#[derive(Default)]
struct OutlineOps {
    ops: String,
}

impl OutlineBuilder for OutlineOps {
    fn move_to(&mut self, x: f32, y: f32) {
        let _ = write!(self.ops, "M{x},{y};");
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let _ = write!(self.ops, "L{x},{y};");
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let _ = write!(self.ops, "Q{x1},{y1},{x},{y};");
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let _ = write!(self.ops, "C{x1},{y1},{x2},{y2},{x},{y};");
    }

    fn close(&mut self) {
        self.ops.push_str("Z;");
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn map_with(entries: &[(&str, &str)]) -> GlyphMap {
        GlyphMap::from_table(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn no_font_passes_through() {
        let map = map_with(&[]);
        assert_eq!(map.decode(None, "12.5万"), "12.5万");
    }

    #[test]
    fn empty_text_passes_through() {
        let map = map_with(&[]);
        assert_eq!(map.decode(Some(b"whatever".as_slice()), ""), "");
    }

    #[test]
    fn unparsable_font_passes_through() {
        let map = map_with(&[]);
        assert_eq!(map.decode(Some(b"not a font".as_slice()), "12.5"), "12.5");
    }

    #[test]
    fn known_hash_maps_to_plaintext() {
        let map = map_with(&[("abcd1234", "5")]);
        assert_eq!(map.map_glyph('\u{e624}', "abcd1234"), "5");
    }

    #[test]
    fn unknown_hash_becomes_placeholder() {
        let map = map_with(&[]);
        assert_eq!(map.map_glyph('\u{e624}', "deadbeef99"), "[dead]");
    }

    #[test]
    fn empty_outline_uses_sentinel_mapping_when_present() {
        let map = map_with(&[(EMPTY_OUTLINE, " ")]);
        assert_eq!(map.map_glyph('\u{e624}', EMPTY_OUTLINE), " ");

        let unmapped = map_with(&[]);
        assert_eq!(unmapped.map_glyph('\u{e624}', EMPTY_OUTLINE), "[empt]");
    }

    #[test]
    fn loads_embedded_default() {
        let map = GlyphMap::load(None).unwrap();
        assert!(!map.version().is_empty());
    }
}
