//! Streaming, field-selective manifest decoding.
//!
//! Bucket scans touch thousands of manifests but usually need one or two
//! keys from each. [`ManifestDecoder`] walks the top-level object once,
//! materializing only the requested keys and skipping everything else with
//! [`IgnoredAny`]. It owns a read buffer that is reused across calls, so a
//! single decoder per worker is enough for a whole scan.
//!
//! Manifest values are loose: most list fields take either a single string
//! or an array, and `bin`/`shortcuts`/`persist` additionally allow nested
//! arrays. The visitors below normalize those shapes into the typed model.

use crate::error::{LadleError, Result};
use crate::manifest::{
    App, Architecture, ArchitectureKey, Bin, DetailField, Dependency, EnvVar, Installer,
    PersistDir, Shortcut, merge_into_downloadables,
};
use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Large enough for every manifest in the main buckets without reallocating
const BUFFER_CAPACITY: usize = 128 * 1024;

pub struct ManifestDecoder {
    buffer: Vec<u8>,
}

impl Default for ManifestDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ManifestDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(BUFFER_CAPACITY),
        }
    }

    /// Load `fields` of `app` from its manifest file.
    pub fn load(&mut self, app: &mut App, fields: &[DetailField]) -> Result<()> {
        let path = app.manifest_path.clone();
        let file = File::open(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => LadleError::ManifestNotFound(path.clone()),
            _ => LadleError::IoError(e),
        })?;
        self.load_from_reader(file, &path, app, fields)
    }

    /// Load `fields` from an arbitrary reader, e.g. a manifest from history.
    /// `path` is only used in error messages.
    pub fn load_from_reader<R: Read>(
        &mut self,
        mut reader: R,
        path: &Path,
        app: &mut App,
        fields: &[DetailField],
    ) -> Result<()> {
        self.buffer.clear();
        reader.read_to_end(&mut self.buffer)?;
        decode_slice(&self.buffer, app, fields).map_err(|source| LadleError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read only the `version` key from raw manifest bytes.
    pub fn read_version(&mut self, data: &[u8]) -> Option<String> {
        let mut app = App::default();
        decode_slice(data, &mut app, &[DetailField::Version]).ok()?;
        Some(app.version)
    }
}

fn decode_slice(
    data: &[u8],
    app: &mut App,
    fields: &[DetailField],
) -> std::result::Result<(), serde_json::Error> {
    let mut de = serde_json::Deserializer::from_slice(data);
    ManifestSeed { app, fields }.deserialize(&mut de)?;
    de.end()
}

struct ManifestSeed<'a> {
    app: &'a mut App,
    fields: &'a [DetailField],
}

impl<'de> DeserializeSeed<'de> for ManifestSeed<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> std::result::Result<(), D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for ManifestSeed<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a manifest object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<(), A::Error> {
        let app = self.app;
        let mut urls = Vec::new();
        let mut hashes = Vec::new();
        let mut extract_dirs = Vec::new();
        let mut extract_tos = Vec::new();

        while let Some(FieldKey(field)) = map.next_key::<FieldKey>()? {
            let field = match field {
                Some(field) if self.fields.contains(&field) => field,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                    continue;
                }
            };

            match field {
                DetailField::Description => {
                    app.description = map.next_value::<Option<String>>()?.unwrap_or_default()
                }
                DetailField::Version => {
                    app.version = map.next_value::<Option<String>>()?.unwrap_or_default()
                }
                DetailField::Notes => app.notes = map.next_value::<OneOrMany>()?.0.join("\n"),
                DetailField::Url => urls = map.next_value::<OneOrMany>()?.0,
                DetailField::Hash => hashes = map.next_value::<OneOrMany>()?.0,
                DetailField::ExtractDir => extract_dirs = map.next_value::<OneOrMany>()?.0,
                DetailField::ExtractTo => extract_tos = map.next_value::<OneOrMany>()?.0,
                DetailField::Bin => app.bin = map.next_value::<Rows>()?.into_bins(),
                DetailField::Shortcuts => {
                    app.shortcuts = map.next_value::<Rows>()?.into_shortcuts()
                }
                DetailField::Persist => app.persist = map.next_value::<Rows>()?.into_persist(),
                DetailField::Depends => {
                    let bucket = app.bucket_name().to_string();
                    app.depends = map
                        .next_value::<OneOrMany>()?
                        .0
                        .iter()
                        .map(|value| Dependency::parse(value, &bucket))
                        .collect();
                }
                DetailField::EnvAddPath => app.env_add_path = map.next_value::<OneOrMany>()?.0,
                DetailField::EnvSet => app.env_set = map.next_value::<EnvSet>()?.0,
                DetailField::Installer => {
                    app.installer = map.next_value::<Option<RawInstaller>>()?.map(Into::into)
                }
                DetailField::Uninstaller => {
                    app.uninstaller = map.next_value::<Option<RawInstaller>>()?.map(Into::into)
                }
                DetailField::InnoSetup => {
                    app.innosetup = map.next_value::<Option<bool>>()?.unwrap_or(false)
                }
                DetailField::PreInstall => app.pre_install = map.next_value::<OneOrMany>()?.0,
                DetailField::PostInstall => app.post_install = map.next_value::<OneOrMany>()?.0,
                DetailField::PreUninstall => app.pre_uninstall = map.next_value::<OneOrMany>()?.0,
                DetailField::PostUninstall => {
                    app.post_uninstall = map.next_value::<OneOrMany>()?.0
                }
                DetailField::Architecture => {
                    let raw = map.next_value::<Option<RawArchitectures>>()?.unwrap_or_default();
                    app.architecture = raw.0;
                }
            }
        }

        // Apps without root URLs carry them per architecture; extract_dir
        // and extract_to are then only applied during resolution.
        if !urls.is_empty() {
            app.downloadables = merge_into_downloadables(&urls, &hashes, &extract_dirs, &extract_tos);
        }
        if !extract_tos.is_empty() {
            app.extract_to = extract_tos;
        }

        Ok(())
    }
}

/// Top-level key, `None` for keys the model doesn't know
struct FieldKey(Option<DetailField>);

impl<'de> Deserialize<'de> for FieldKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct KeyVisitor;

        impl Visitor<'_> for KeyVisitor {
            type Value = FieldKey;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a manifest key")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<FieldKey, E> {
                Ok(FieldKey(DetailField::from_key(v)))
            }
        }

        deserializer.deserialize_identifier(KeyVisitor)
    }
}

/// A string, an array of strings, or null
#[derive(Default)]
struct OneOrMany(Vec<String>);

impl<'de> Deserialize<'de> for OneOrMany {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct OneOrManyVisitor;

        impl<'de> Visitor<'de> for OneOrManyVisitor {
            type Value = OneOrMany;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a string or an array of strings")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<OneOrMany, E> {
                Ok(OneOrMany(vec![v.to_string()]))
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<OneOrMany, E> {
                Ok(OneOrMany::default())
            }

            fn visit_none<E: de::Error>(self) -> std::result::Result<OneOrMany, E> {
                Ok(OneOrMany::default())
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<OneOrMany, A::Error> {
                let mut values = Vec::with_capacity(seq.size_hint().unwrap_or(1));
                while let Some(value) = seq.next_element::<String>()? {
                    values.push(value);
                }
                Ok(OneOrMany(values))
            }
        }

        deserializer.deserialize_any(OneOrManyVisitor)
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    OneOrMany::deserialize(deserializer).map(|v| v.0)
}

/// The `bin` vocabulary: `"a"`, `["a", "b"]` or `[["a", "alias", "args"...]]`.
/// Each row is a flat list of strings; nested argument arrays are flattened.
#[derive(Default)]
struct Rows(Vec<Vec<String>>);

impl Rows {
    fn into_bins(self) -> Vec<Bin> {
        self.0
            .into_iter()
            .filter(|row| !row.is_empty())
            .map(|row| {
                let mut cells = row.into_iter();
                Bin {
                    name: cells.next().unwrap_or_default(),
                    alias: cells.next().unwrap_or_default(),
                    args: cells.collect(),
                }
            })
            .collect()
    }

    fn into_shortcuts(self) -> Vec<Shortcut> {
        self.0
            .into_iter()
            .filter(|row| !row.is_empty())
            .map(|row| {
                let mut cells = row.into_iter();
                Shortcut {
                    target: cells.next().unwrap_or_default(),
                    name: cells.next().unwrap_or_default(),
                    args: cells.next().unwrap_or_default(),
                    icon: cells.next().unwrap_or_default(),
                }
            })
            .collect()
    }

    fn into_persist(self) -> Vec<PersistDir> {
        self.0
            .into_iter()
            .filter(|row| !row.is_empty())
            .map(|row| {
                let mut cells = row.into_iter();
                PersistDir {
                    dir: cells.next().unwrap_or_default(),
                    link_name: cells.next().unwrap_or_default(),
                }
            })
            .collect()
    }
}

impl<'de> Deserialize<'de> for Rows {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct RowsVisitor;

        impl<'de> Visitor<'de> for RowsVisitor {
            type Value = Rows;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a string, an array of strings or an array of arrays")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Rows, E> {
                Ok(Rows(vec![vec![v.to_string()]]))
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<Rows, E> {
                Ok(Rows::default())
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Rows, A::Error> {
                let mut rows = Vec::new();
                while let Some(Row(row)) = seq.next_element::<Row>()? {
                    rows.push(row);
                }
                Ok(Rows(rows))
            }
        }

        deserializer.deserialize_any(RowsVisitor)
    }
}

/// One entry of a `bin`-style array: a string or a (possibly nested) array
struct Row(Vec<String>);

impl<'de> Deserialize<'de> for Row {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct RowVisitor;

        impl<'de> Visitor<'de> for RowVisitor {
            type Value = Row;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a string or an array")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Row, E> {
                Ok(Row(vec![v.to_string()]))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Row, A::Error> {
                let mut cells = Vec::new();
                while let Some(cell) = seq.next_element::<OneOrMany>()? {
                    cells.extend(cell.0);
                }
                Ok(Row(cells))
            }
        }

        deserializer.deserialize_any(RowVisitor)
    }
}

/// `env_set` object, keeping manifest order
#[derive(Default)]
struct EnvSet(Vec<EnvVar>);

impl<'de> Deserialize<'de> for EnvSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct EnvSetVisitor;

        impl<'de> Visitor<'de> for EnvSetVisitor {
            type Value = EnvSet;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object of environment variables")
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<EnvSet, E> {
                Ok(EnvSet::default())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<EnvSet, A::Error> {
                let mut vars = Vec::new();
                while let Some((key, value)) = map.next_entry::<String, String>()? {
                    vars.push(EnvVar { key, value });
                }
                Ok(EnvSet(vars))
            }
        }

        deserializer.deserialize_any(EnvSetVisitor)
    }
}

#[derive(Deserialize, Default)]
struct RawInstaller {
    #[serde(default)]
    file: String,
    #[serde(default, deserialize_with = "one_or_many")]
    script: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    args: Vec<String>,
    #[serde(default)]
    keep: bool,
}

impl From<RawInstaller> for Installer {
    fn from(raw: RawInstaller) -> Self {
        Installer {
            file: raw.file,
            script: raw.script,
            args: raw.args,
            keep: raw.keep,
        }
    }
}

#[derive(Deserialize, Default)]
struct RawArchitecture {
    #[serde(default, deserialize_with = "one_or_many")]
    url: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    hash: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    extract_dir: Vec<String>,
    #[serde(default)]
    bin: Option<Rows>,
    #[serde(default)]
    shortcuts: Option<Rows>,
    #[serde(default)]
    installer: Option<RawInstaller>,
    #[serde(default)]
    uninstaller: Option<RawInstaller>,
    #[serde(default, deserialize_with = "one_or_many")]
    pre_install: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    post_install: Vec<String>,
}

impl From<RawArchitecture> for Architecture {
    fn from(raw: RawArchitecture) -> Self {
        Architecture {
            // extract_to only exists at the root level
            downloadables: merge_into_downloadables(&raw.url, &raw.hash, &raw.extract_dir, &[]),
            bin: raw.bin.map(Rows::into_bins).unwrap_or_default(),
            shortcuts: raw.shortcuts.map(Rows::into_shortcuts).unwrap_or_default(),
            installer: raw.installer.map(Into::into),
            uninstaller: raw.uninstaller.map(Into::into),
            pre_install: raw.pre_install,
            post_install: raw.post_install,
        }
    }
}

/// The `architecture` object; unknown architecture keys are skipped
#[derive(Default)]
struct RawArchitectures(std::collections::BTreeMap<ArchitectureKey, Architecture>);

impl<'de> Deserialize<'de> for RawArchitectures {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ArchVisitor;

        impl<'de> Visitor<'de> for ArchVisitor {
            type Value = RawArchitectures;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object keyed by architecture")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<RawArchitectures, A::Error> {
                let mut result = std::collections::BTreeMap::new();
                while let Some(key) = map.next_key::<String>()? {
                    match key.parse::<ArchitectureKey>() {
                        Ok(arch) => {
                            let raw = map.next_value::<RawArchitecture>()?;
                            result.insert(arch, raw.into());
                        }
                        Err(_) => {
                            map.next_value::<IgnoredAny>()?;
                        }
                    }
                }
                Ok(RawArchitectures(result))
            }
        }

        deserializer.deserialize_map(ArchVisitor)
    }
}
