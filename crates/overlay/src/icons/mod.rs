//! Icon resolution cache.
//!
//! Built once after the host signals its data is loaded, immutable
//! afterwards. Queries resolve through three disjoint tiers: exact entity
//! id, then category keyword (first registered wins), then the per-type
//! default, which is total by construction.

mod raster;

#[cfg(windows)]
pub(crate) mod dx11;

pub use raster::{RasterIcon, rasterize_svg};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, info, trace, warn};

/// Opaque GPU texture handle, backend-defined. On the D3D11 backend it is
/// the shader-resource view pointer, usable directly as an imgui texture id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub usize);

/// One rasterized, uploaded icon.
#[derive(Debug, Clone, Copy)]
pub struct IconAsset {
    pub texture: TextureHandle,
    pub width: u32,
    pub height: u32,
}

/// Built-in icon slots. The load phase populates every variant from the
/// base icon directory, making the type tier the guaranteed catch-all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum IconType {
    Sword,
    Dagger,
    Axe,
    Mace,
    Greatsword,
    Bow,
    Crossbow,
    Shield,
    Staff,
    Spell,
    Shout,
    Potion,
    Poison,
    Food,
    Scroll,
    Armor,
    Ring,
    Amulet,
    Torch,
    Misc,
}

impl IconType {
    pub const ALL: [IconType; 20] = [
        Self::Sword,
        Self::Dagger,
        Self::Axe,
        Self::Mace,
        Self::Greatsword,
        Self::Bow,
        Self::Crossbow,
        Self::Shield,
        Self::Staff,
        Self::Spell,
        Self::Shout,
        Self::Potion,
        Self::Poison,
        Self::Food,
        Self::Scroll,
        Self::Armor,
        Self::Ring,
        Self::Amulet,
        Self::Torch,
        Self::Misc,
    ];

    /// Base asset file stem, `<stem>.svg` under the builtin icon directory.
    pub fn file_stem(self) -> &'static str {
        match self {
            Self::Sword => "sword",
            Self::Dagger => "dagger",
            Self::Axe => "axe",
            Self::Mace => "mace",
            Self::Greatsword => "greatsword",
            Self::Bow => "bow",
            Self::Crossbow => "crossbow",
            Self::Shield => "shield",
            Self::Staff => "staff",
            Self::Spell => "spell",
            Self::Shout => "shout",
            Self::Potion => "potion",
            Self::Poison => "poison",
            Self::Food => "food",
            Self::Scroll => "scroll",
            Self::Armor => "armor",
            Self::Ring => "ring",
            Self::Amulet => "amulet",
            Self::Torch => "torch",
            Self::Misc => "misc",
        }
    }
}

/// Custom icon filename patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomIconName {
    /// `FID_<plugin>_0x<hex>.svg`: icon for one exact entity.
    Form { plugin: String, id: u32 },
    /// `KWD_<keyword>.svg`: icon for every entity carrying the keyword.
    Keyword(String),
}

impl CustomIconName {
    /// Parse a directory entry name. Anything that does not match either
    /// pattern (wrong prefix, missing `_0x`, wrong extension, empty
    /// components, unparsable hex) is `None` and gets skipped silently.
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(".svg")?;

        if let Some(rest) = stem.strip_prefix("FID_") {
            let (plugin, hex) = rest
                .split_once("_0x")
                .or_else(|| rest.split_once("_0X"))?;
            if plugin.is_empty() {
                return None;
            }
            let id = u32::from_str_radix(hex, 16).ok()?;
            Some(Self::Form {
                plugin: plugin.to_owned(),
                id,
            })
        } else if let Some(keyword) = stem.strip_prefix("KWD_") {
            if keyword.is_empty() {
                return None;
            }
            Some(Self::Keyword(keyword.to_owned()))
        } else {
            None
        }
    }
}

/// GPU upload seam, so cache logic stays testable without a device.
pub trait TextureUploader {
    /// Upload a straight-alpha RGBA8 buffer as an immutable 2D texture.
    /// The CPU buffer is dropped right after upload.
    fn upload_rgba(&mut self, width: u32, height: u32, rgba: &[u8]) -> anyhow::Result<TextureHandle>;
}

/// External entity-lookup collaborator: turns a `(plugin, local id)` pair
/// from a `FID_` filename into the stable runtime entity id, or `None` if
/// the plugin is absent from the current load order.
pub trait EntityProvider: Send + Sync {
    fn lookup_form(&self, plugin: &str, local_id: u32) -> Option<u32>;
}

/// The optional entity argument of [`IconCache::resolve`].
pub trait IconQuery {
    fn form_id(&self) -> u32;
    fn has_keyword(&self, keyword: &str) -> bool;
}

/// Asset directory layout for the load phase.
#[derive(Debug, Clone)]
pub struct IconDirs {
    pub builtin: PathBuf,
    pub custom: PathBuf,
}

pub struct IconCache {
    by_form: HashMap<u32, IconAsset>,
    /// Scan order preserved; the first registered keyword an entity
    /// carries wins.
    by_keyword: Vec<(String, IconAsset)>,
    /// Indexed by `IconType` discriminant, total.
    by_type: Vec<IconAsset>,
}

impl IconCache {
    /// Load the built-in per-type set, then scan the custom directory.
    /// Built-in icons are mandatory; custom entries are skippable per item.
    pub fn load(
        dirs: &IconDirs,
        entities: &dyn EntityProvider,
        uploader: &mut dyn TextureUploader,
    ) -> anyhow::Result<Self> {
        let mut by_type = Vec::with_capacity(IconType::ALL.len());
        for ty in IconType::ALL {
            let path = dirs.builtin.join(format!("{}.svg", ty.file_stem()));
            let asset = load_one(&path, uploader)
                .with_context(|| format!("missing or broken built-in icon for {ty:?}"))?;
            by_type.push(asset);
        }

        let mut cache = Self {
            by_form: HashMap::new(),
            by_keyword: Vec::new(),
            by_type,
        };
        cache.load_custom(&dirs.custom, entities, uploader)?;

        info!(
            builtin = cache.by_type.len(),
            forms = cache.by_form.len(),
            keywords = cache.by_keyword.len(),
            "icon cache built"
        );
        Ok(cache)
    }

    /// Scan the custom icon directory in sorted filename order, so keyword
    /// registration order is stable across filesystems.
    fn load_custom(
        &mut self,
        dir: &Path,
        entities: &dyn EntityProvider,
        uploader: &mut dyn TextureUploader,
    ) -> anyhow::Result<()> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                debug!(dir = %dir.display(), %err, "no custom icon directory");
                return Ok(());
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();

        for name in names {
            let Some(parsed) = CustomIconName::parse(&name) else {
                trace!(%name, "skipping non-icon file");
                continue;
            };

            let key = match parsed {
                CustomIconName::Form { ref plugin, id } => {
                    match entities.lookup_form(plugin, id) {
                        Some(form_id) => form_id,
                        None => {
                            // Load-order dependent; the icon is dropped for
                            // this session, not retried.
                            warn!(%name, plugin = plugin.as_str(), id, "entity not found, skipping icon");
                            continue;
                        }
                    }
                }
                CustomIconName::Keyword(ref keyword) => {
                    if self.by_keyword.iter().any(|(k, _)| k == keyword) {
                        warn!(%name, keyword = keyword.as_str(), "duplicate keyword icon, keeping the first");
                        continue;
                    }
                    0
                }
            };

            let asset = match load_one(&dir.join(&name), uploader) {
                Ok(asset) => asset,
                Err(err) => {
                    warn!(%name, err = format!("{err:#}").as_str(), "failed to load custom icon, skipping");
                    continue;
                }
            };

            match parsed {
                CustomIconName::Form { .. } => {
                    self.by_form.insert(key, asset);
                }
                CustomIconName::Keyword(keyword) => {
                    self.by_keyword.push((keyword, asset));
                }
            }
        }
        Ok(())
    }

    /// Resolve to the best-matching icon: exact entity id, first registered
    /// keyword, then the per-type default. Total for every valid type.
    pub fn resolve(&self, ty: IconType, entity: Option<&dyn IconQuery>) -> IconAsset {
        if let Some(entity) = entity {
            if let Some(asset) = self.by_form.get(&entity.form_id()) {
                return *asset;
            }
            for (keyword, asset) in &self.by_keyword {
                if entity.has_keyword(keyword) {
                    return *asset;
                }
            }
        }
        self.by_type[ty as usize]
    }
}

fn load_one(path: &Path, uploader: &mut dyn TextureUploader) -> anyhow::Result<IconAsset> {
    let image = rasterize_svg(path)?;
    let texture = uploader
        .upload_rgba(image.width, image.height, &image.rgba)
        .with_context(|| format!("texture upload failed for {}", path.display()))?;
    Ok(IconAsset {
        texture,
        width: image.width,
        height: image.height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn svg(size: u32) -> String {
        format!(
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="{size}" height="{size}"><rect width="{size}" height="{size}" fill="#00ff00"/></svg>"##
        )
    }

    /// Hands out sequential handles and records upload dimensions.
    #[derive(Default)]
    struct StubUploader {
        uploads: Vec<(u32, u32)>,
    }

    impl TextureUploader for StubUploader {
        fn upload_rgba(&mut self, width: u32, height: u32, rgba: &[u8]) -> anyhow::Result<TextureHandle> {
            assert_eq!(rgba.len() as u32, width * height * 4);
            self.uploads.push((width, height));
            Ok(TextureHandle(self.uploads.len()))
        }
    }

    struct StubEntities(HashMap<(String, u32), u32>);

    impl EntityProvider for StubEntities {
        fn lookup_form(&self, plugin: &str, local_id: u32) -> Option<u32> {
            self.0.get(&(plugin.to_owned(), local_id)).copied()
        }
    }

    struct Entity {
        form_id: u32,
        keywords: Vec<&'static str>,
    }

    impl IconQuery for Entity {
        fn form_id(&self) -> u32 {
            self.form_id
        }
        fn has_keyword(&self, keyword: &str) -> bool {
            self.keywords.contains(&keyword)
        }
    }

    fn setup() -> (tempfile::TempDir, IconDirs) {
        let root = tempfile::tempdir().unwrap();
        let dirs = IconDirs {
            builtin: root.path().join("icons"),
            custom: root.path().join("icons_custom"),
        };
        fs::create_dir_all(&dirs.builtin).unwrap();
        fs::create_dir_all(&dirs.custom).unwrap();
        for ty in IconType::ALL {
            fs::write(dirs.builtin.join(format!("{}.svg", ty.file_stem())), svg(16)).unwrap();
        }
        (root, dirs)
    }

    fn no_entities() -> StubEntities {
        StubEntities(HashMap::new())
    }

    #[test]
    fn parses_form_id_names() {
        assert_eq!(
            CustomIconName::parse("FID_SomePlugin_0x00001234.svg"),
            Some(CustomIconName::Form {
                plugin: "SomePlugin".into(),
                id: 0x1234
            })
        );
        // Uppercase hex marker variant.
        assert_eq!(
            CustomIconName::parse("FID_Some.esp_0XFF.svg"),
            Some(CustomIconName::Form {
                plugin: "Some.esp".into(),
                id: 0xff
            })
        );
    }

    #[test]
    fn parses_keyword_names() {
        assert_eq!(
            CustomIconName::parse("KWD_Weapon.svg"),
            Some(CustomIconName::Keyword("Weapon".into()))
        );
    }

    #[test]
    fn rejects_everything_else() {
        assert_eq!(CustomIconName::parse("notes.txt"), None);
        assert_eq!(CustomIconName::parse("FID_broken.svg"), None);
        assert_eq!(CustomIconName::parse("KWD_.svg"), None);
        assert_eq!(CustomIconName::parse("FID__0x12.svg"), None);
        assert_eq!(CustomIconName::parse("FID_Plugin_0xNOPE.svg"), None);
        assert_eq!(CustomIconName::parse("icon.svg"), None);
    }

    #[test]
    fn type_tier_is_total() {
        let (_root, dirs) = setup();
        let mut uploader = StubUploader::default();
        let cache = IconCache::load(&dirs, &no_entities(), &mut uploader).unwrap();

        for ty in IconType::ALL {
            let asset = cache.resolve(ty, None);
            assert_ne!(asset.texture, TextureHandle(0));
            assert_eq!((asset.width, asset.height), (16, 16));
        }
    }

    #[test]
    fn missing_builtin_icon_is_a_load_error() {
        let (_root, dirs) = setup();
        fs::remove_file(dirs.builtin.join("sword.svg")).unwrap();
        let mut uploader = StubUploader::default();
        assert!(IconCache::load(&dirs, &no_entities(), &mut uploader).is_err());
    }

    #[test]
    fn exact_id_beats_keyword_and_type() {
        let (_root, dirs) = setup();
        fs::write(dirs.custom.join("FID_MyMod_0x0042.svg"), svg(24)).unwrap();
        fs::write(dirs.custom.join("KWD_Weapon.svg"), svg(32)).unwrap();

        let entities = StubEntities(HashMap::from([(("MyMod".into(), 0x42), 0xfe00_0042)]));
        let mut uploader = StubUploader::default();
        let cache = IconCache::load(&dirs, &entities, &mut uploader).unwrap();

        let entity = Entity {
            form_id: 0xfe00_0042,
            keywords: vec!["Weapon"],
        };
        let asset = cache.resolve(IconType::Sword, Some(&entity));
        assert_eq!((asset.width, asset.height), (24, 24));
    }

    #[test]
    fn first_registered_keyword_wins() {
        let (_root, dirs) = setup();
        // Sorted scan order registers Alpha before Beta.
        fs::write(dirs.custom.join("KWD_Alpha.svg"), svg(24)).unwrap();
        fs::write(dirs.custom.join("KWD_Beta.svg"), svg(32)).unwrap();

        let mut uploader = StubUploader::default();
        let cache = IconCache::load(&dirs, &no_entities(), &mut uploader).unwrap();

        let entity = Entity {
            form_id: 1,
            keywords: vec!["Beta", "Alpha"],
        };
        let asset = cache.resolve(IconType::Misc, Some(&entity));
        assert_eq!((asset.width, asset.height), (24, 24));
    }

    #[test]
    fn keywordless_entity_falls_back_to_type() {
        let (_root, dirs) = setup();
        fs::write(dirs.custom.join("KWD_Weapon.svg"), svg(32)).unwrap();

        let mut uploader = StubUploader::default();
        let cache = IconCache::load(&dirs, &no_entities(), &mut uploader).unwrap();

        let entity = Entity {
            form_id: 7,
            keywords: vec![],
        };
        let asset = cache.resolve(IconType::Potion, Some(&entity));
        assert_eq!((asset.width, asset.height), (16, 16));
    }

    #[test]
    fn unresolved_entity_icon_is_skipped() {
        let (_root, dirs) = setup();
        fs::write(dirs.custom.join("FID_NotLoaded_0x10.svg"), svg(24)).unwrap();
        fs::write(dirs.custom.join("notes.txt"), "hello").unwrap();
        fs::write(dirs.custom.join("FID_broken.svg"), svg(24)).unwrap();

        let mut uploader = StubUploader::default();
        let cache = IconCache::load(&dirs, &no_entities(), &mut uploader).unwrap();

        // Only the builtin set was uploaded.
        assert_eq!(uploader.uploads.len(), IconType::ALL.len());
        let entity = Entity {
            form_id: 0x10,
            keywords: vec![],
        };
        let asset = cache.resolve(IconType::Misc, Some(&entity));
        assert_eq!((asset.width, asset.height), (16, 16));
    }

    #[test]
    fn broken_custom_file_is_skipped_not_fatal() {
        let (_root, dirs) = setup();
        fs::write(dirs.custom.join("KWD_Broken.svg"), "<svg").unwrap();
        fs::write(dirs.custom.join("KWD_Fine.svg"), svg(32)).unwrap();

        let mut uploader = StubUploader::default();
        let cache = IconCache::load(&dirs, &no_entities(), &mut uploader).unwrap();

        let entity = Entity {
            form_id: 1,
            keywords: vec!["Broken", "Fine"],
        };
        let asset = cache.resolve(IconType::Misc, Some(&entity));
        assert_eq!((asset.width, asset.height), (32, 32));
    }

    #[test]
    fn missing_custom_directory_is_fine() {
        let (_root, dirs) = setup();
        fs::remove_dir(&dirs.custom).unwrap();
        let mut uploader = StubUploader::default();
        assert!(IconCache::load(&dirs, &no_entities(), &mut uploader).is_ok());
    }
}
