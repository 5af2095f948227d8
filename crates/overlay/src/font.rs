//! Font selection for the overlay atlas.
//!
//! Derived once at bootstrap from an INI-style config file: section
//! `config`, key `font` names a language tag, and the first `.ttf`/`.ttc`
//! under `<fonts_root>/<tag>/` becomes the overlay font with the glyph
//! range the tag maps to. Every failure along the way falls back silently
//! to the GUI library's built-in font.

use std::fs;
use std::path::{Path, PathBuf};

use imgui::FontGlyphRanges;
use tracing::{debug, info};

/// Unicode glyph-range selector for the font atlas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlyphRange {
    /// Basic Latin plus extended A, the atlas default.
    Default,
    ChineseFull,
    Korean,
    Japanese,
    Thai,
    Vietnamese,
    Cyrillic,
}

impl GlyphRange {
    /// Fixed language tag table. Unrecognized tags fall through with no
    /// extra range.
    pub fn for_language(tag: &str) -> Self {
        match tag {
            "Chinese" => Self::ChineseFull,
            "Korean" => Self::Korean,
            "Japanese" => Self::Japanese,
            "Thai" => Self::Thai,
            "Vietnamese" => Self::Vietnamese,
            "Cyrillic" => Self::Cyrillic,
            _ => Self::Default,
        }
    }

    pub fn to_imgui(self) -> FontGlyphRanges {
        match self {
            Self::Default => FontGlyphRanges::default(),
            Self::ChineseFull => FontGlyphRanges::chinese_full(),
            Self::Korean => FontGlyphRanges::korean(),
            Self::Japanese => FontGlyphRanges::japanese(),
            Self::Thai => FontGlyphRanges::thai(),
            Self::Vietnamese => FontGlyphRanges::vietnamese(),
            Self::Cyrillic => FontGlyphRanges::cyrillic(),
        }
    }
}

/// Resolved overlay font: a custom font file plus glyph range, or the
/// built-in default when `path` is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontSelection {
    pub language: Option<String>,
    pub path: Option<PathBuf>,
    pub range: GlyphRange,
}

impl Default for FontSelection {
    fn default() -> Self {
        Self {
            language: None,
            path: None,
            range: GlyphRange::Default,
        }
    }
}

impl FontSelection {
    /// Read the font config and search the language subdirectory for a
    /// font file. Missing config, unknown tag, or empty directory all
    /// produce the default selection; nothing here is an error.
    pub fn discover(config_path: &Path, fonts_root: &Path) -> Self {
        let Ok(config) = fs::read_to_string(config_path) else {
            debug!(path = %config_path.display(), "no font config, using built-in font");
            return Self::default();
        };
        let Some(language) = parse_font_config(&config) else {
            return Self::default();
        };

        let Some(path) = first_font_file(&fonts_root.join(&language)) else {
            info!(%language, "no font file found for language, using built-in font");
            return Self::default();
        };

        // The glyph range applies only when a custom font actually loads.
        let range = GlyphRange::for_language(&language);
        info!(%language, path = %path.display(), ?range, "custom overlay font selected");
        Self {
            language: Some(language),
            path: Some(path),
            range,
        }
    }
}

/// Extract the `font` key of the `[config]` section.
pub fn parse_font_config(text: &str) -> Option<String> {
    let mut in_config = false;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            in_config = section.trim().eq_ignore_ascii_case("config");
            continue;
        }
        if !in_config {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if key.trim() == "font" {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_owned());
            }
        }
    }
    None
}

/// First `.ttf`/`.ttc` in `dir`, by filename order. Sorted so the pick is
/// stable across filesystems.
fn first_font_file(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    let mut fonts: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("ttf") || ext.eq_ignore_ascii_case("ttc"))
        })
        .collect();
    fonts.sort();
    fonts.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_font_key_from_config_section() {
        let text = "; overlay font settings\n[config]\nfont = Korean\n";
        assert_eq!(parse_font_config(text).as_deref(), Some("Korean"));
    }

    #[test]
    fn ignores_other_sections_and_keys() {
        let text = "[display]\nfont = Nope\n[config]\nscale = 2\n";
        assert_eq!(parse_font_config(text), None);
    }

    #[test]
    fn empty_value_counts_as_absent() {
        assert_eq!(parse_font_config("[config]\nfont =\n"), None);
    }

    #[test]
    fn known_tags_map_to_their_ranges() {
        assert_eq!(GlyphRange::for_language("Korean"), GlyphRange::Korean);
        assert_eq!(GlyphRange::for_language("Chinese"), GlyphRange::ChineseFull);
        assert_eq!(GlyphRange::for_language("Cyrillic"), GlyphRange::Cyrillic);
    }

    #[test]
    fn unknown_tag_gets_no_extra_range() {
        assert_eq!(GlyphRange::for_language("Klingon"), GlyphRange::Default);
    }

    #[test]
    fn discover_finds_first_font_sorted_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("FontConfig.ini");
        fs::write(&config, "[config]\nfont = Korean\n").unwrap();

        let korean = dir.path().join("fonts").join("Korean");
        fs::create_dir_all(&korean).unwrap();
        fs::write(korean.join("b.ttf"), b"").unwrap();
        fs::write(korean.join("a.ttc"), b"").unwrap();
        fs::write(korean.join("readme.txt"), b"").unwrap();

        let selection = FontSelection::discover(&config, &dir.path().join("fonts"));
        assert_eq!(selection.language.as_deref(), Some("Korean"));
        assert_eq!(selection.path, Some(korean.join("a.ttc")));
        assert_eq!(selection.range, GlyphRange::Korean);
    }

    #[test]
    fn unrecognized_language_still_loads_the_font() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("FontConfig.ini");
        fs::write(&config, "[config]\nfont = Klingon\n").unwrap();

        let klingon = dir.path().join("fonts").join("Klingon");
        fs::create_dir_all(&klingon).unwrap();
        fs::write(klingon.join("pIqaD.ttf"), b"").unwrap();

        let selection = FontSelection::discover(&config, &dir.path().join("fonts"));
        assert_eq!(selection.path, Some(klingon.join("pIqaD.ttf")));
        assert_eq!(selection.range, GlyphRange::Default);
    }

    #[test]
    fn missing_config_falls_back_silently() {
        let dir = tempfile::tempdir().unwrap();
        let selection =
            FontSelection::discover(&dir.path().join("nope.ini"), &dir.path().join("fonts"));
        assert_eq!(selection, FontSelection::default());
    }

    #[test]
    fn missing_font_directory_falls_back_silently() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("FontConfig.ini");
        fs::write(&config, "[config]\nfont = Korean\n").unwrap();

        let selection = FontSelection::discover(&config, &dir.path().join("fonts"));
        assert_eq!(selection, FontSelection::default());
    }
}
