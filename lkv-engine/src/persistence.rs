//! # Snapshot Persistence
//!
//! Load and save the whole key/value map as a single file.
//!
//! ## Design Principles
//!
//! 1. **Opaque Codec**: Storage only sees `load(path)` / `save(path, map)`;
//!    the format lives behind the [`Persistence`] trait.
//! 2. **Absent Is Empty**: A missing file loads as an empty map.
//! 3. **Stable Output**: Entries are written sorted by key, so saving the same
//!    map twice produces identical bytes.
//! 4. **Replace, Don't Truncate**: Saves go to a sibling temp file that is then
//!    renamed over the target.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ahash::RandomState;
use hashbrown::HashMap;

use lkv_common::{KvError, KvResult, protocol::KEY_VALUE_DELIMITER};

/// In-memory representation of the store contents.
pub type KvMap = HashMap<String, String, RandomState>;

/// Persistence collaborator for snapshots.
pub trait Persistence: Send + Sync {
    /// Reads the snapshot at `path`. An absent file yields an empty map.
    fn load(&self, path: &Path) -> KvResult<KvMap>;

    /// Overwrites the snapshot at `path` with `entries`.
    fn save(&self, path: &Path, entries: &KvMap) -> KvResult<()>;
}

/// Picks a codec from the file extension: `.json` is JSON, anything else INI.
pub fn codec_for_path(path: &Path) -> Box<dyn Persistence> {
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        Box::new(JsonFile)
    } else {
        Box::new(IniFile)
    }
}

/// Flat INI file: one `key=value` per line.
///
/// Section headers and `;`/`#` comments are accepted on load and ignored.
/// A key starting with `;`, `#`, `[` or `\` is written with a leading `\`
/// so it is not mistaken for one of them when loaded back.
#[derive(Debug, Clone, Copy, Default)]
pub struct IniFile;

impl Persistence for IniFile {
    fn load(&self, path: &Path) -> KvResult<KvMap> {
        match read_existing(path)? {
            Some(text) => parse_ini(&text).map_err(|reason| KvError::persistence(path, reason)),
            None => Ok(KvMap::default()),
        }
    }

    fn save(&self, path: &Path, entries: &KvMap) -> KvResult<()> {
        let mut out = String::new();
        for (key, value) in sorted(entries) {
            if key.starts_with(INI_RESERVED) {
                out.push(INI_ESCAPE);
            }
            out.push_str(key);
            out.push(KEY_VALUE_DELIMITER);
            out.push_str(value);
            out.push('\n');
        }
        replace_file(path, out.as_bytes())
    }
}

/// Flat JSON object of string values.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFile;

impl Persistence for JsonFile {
    fn load(&self, path: &Path) -> KvResult<KvMap> {
        let Some(text) = read_existing(path)? else {
            return Ok(KvMap::default());
        };
        let parsed: BTreeMap<String, String> =
            serde_json::from_str(&text).map_err(|err| KvError::persistence(path, err))?;
        Ok(parsed.into_iter().collect())
    }

    fn save(&self, path: &Path, entries: &KvMap) -> KvResult<()> {
        let mut encoded =
            serde_json::to_vec_pretty(&sorted(entries)).map_err(|err| KvError::persistence(path, err))?;
        encoded.push(b'\n');
        replace_file(path, &encoded)
    }
}

/// Leading characters that make a line a comment, a section or an escape.
const INI_RESERVED: &[char] = &[';', '#', '[', INI_ESCAPE];

const INI_ESCAPE: char = '\\';

/// Padding stripped around lines, keys and values. Protocol keys and values
/// never contain these, so stripping them loses nothing.
const INI_BLANKS: &[char] = &[' ', '\t', '\r'];

fn parse_ini(text: &str) -> Result<KvMap, String> {
    let mut entries = KvMap::default();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim_matches(INI_BLANKS);
        let pair = match line.strip_prefix(INI_ESCAPE) {
            Some(escaped) => escaped,
            None if line.is_empty() || line.starts_with(';') || line.starts_with('#') => continue,
            None if line.starts_with('[') && line.ends_with(']') => continue,
            None => line,
        };
        let Some((key, value)) = pair.split_once(KEY_VALUE_DELIMITER) else {
            return Err(format!("line {}: expected key=value", idx + 1));
        };
        entries.insert(
            key.trim_matches(INI_BLANKS).to_string(),
            value.trim_matches(INI_BLANKS).to_string(),
        );
    }
    Ok(entries)
}

fn sorted(entries: &KvMap) -> BTreeMap<&str, &str> {
    entries
        .iter()
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect()
}

fn read_existing(path: &Path) -> KvResult<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(KvError::persistence(path, err)),
    }
}

fn replace_file(path: &Path, contents: &[u8]) -> KvResult<()> {
    let tmp = temp_path(path);
    fs::write(&tmp, contents).map_err(|err| KvError::persistence(&tmp, err))?;
    fs::rename(&tmp, path).map_err(|err| KvError::persistence(path, err))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> KvMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.ini");
        assert!(IniFile.load(&path).unwrap().is_empty());
        assert!(JsonFile.load(&dir.path().join("absent.json")).unwrap().is_empty());
    }

    #[test]
    fn ini_skips_sections_and_comments() {
        let parsed = parse_ini("; header\n[data]\n\ncolor = red\n# note\nshape=circle\n").unwrap();
        assert_eq!(parsed, map(&[("color", "red"), ("shape", "circle")]));
    }

    #[test]
    fn ini_escapes_keys_that_look_like_markup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.txt");
        let entries = map(&[
            ("#tag", "v1"),
            (";note", "v2"),
            ("[x", "]"),
            ("\\path", "v4"),
            ("plain", "#not-a-comment"),
        ]);

        IniFile.save(&path, &entries).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "\\#tag=v1\n\\;note=v2\n\\[x=]\n\\\\path=v4\nplain=#not-a-comment\n"
        );
        assert_eq!(IniFile.load(&path).unwrap(), entries);
    }

    #[test]
    fn ini_rejects_line_without_delimiter() {
        let err = parse_ini("color=red\ngarbage\n").unwrap_err();
        assert_eq!(err, "line 2: expected key=value");
    }

    #[test]
    fn ini_save_is_sorted_and_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.txt");
        fs::write(&path, "stale=entry\n").unwrap();

        IniFile
            .save(&path, &map(&[("b", "2"), ("a", "1"), ("c", "")]))
            .unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "a=1\nb=2\nc=\n");
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn json_codec_reads_back_its_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let entries = map(&[("color", "red"), ("empty", "")]);

        JsonFile.save(&path, &entries).unwrap();
        assert_eq!(JsonFile.load(&path).unwrap(), entries);
    }

    #[test]
    fn json_rejects_non_string_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, r#"{"count": 3}"#).unwrap();

        assert!(matches!(
            JsonFile.load(&path),
            Err(KvError::Persistence { .. })
        ));
    }

    #[test]
    fn codec_follows_extension() {
        let dir = tempfile::tempdir().unwrap();
        let entries = map(&[("k", "v")]);

        let json = dir.path().join("snapshot.JSON");
        codec_for_path(&json).save(&json, &entries).unwrap();
        assert!(fs::read_to_string(&json).unwrap().contains("\"k\": \"v\""));

        let ini = dir.path().join("config.txt");
        codec_for_path(&ini).save(&ini, &entries).unwrap();
        assert_eq!(fs::read_to_string(&ini).unwrap(), "k=v\n");
    }
}
