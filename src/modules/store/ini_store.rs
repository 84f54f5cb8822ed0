use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::core::error::AicmResult;

/// Default INI location relative to the user's home directory.
const DEFAULT_RELATIVE_PATH: &str = ".config/aicostmanager/AICM.INI";

/// Cross-process-safe key/value store persisted to a single sectioned file.
///
/// The file is the sole synchronization point between processes sharing
/// triggered-limit state on one host. Writers hold an exclusive advisory lock
/// on a sibling `.lock` file and replace the file atomically (write-to-temp
/// plus rename), so readers always observe a fully written prior version.
/// The on-disk format is the classic `[section]` / `key = value` layout, kept
/// interchangeable with the other SDK implementations.
#[derive(Debug, Clone)]
pub struct IniStore {
    path: PathBuf,
}

type Sections = BTreeMap<String, BTreeMap<String, String>>;

impl IniStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Resolve the INI path: explicit value, then `AICM_INI_PATH`, then the
    /// per-user default.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        if let Ok(path) = std::env::var("AICM_INI_PATH") {
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }
        home_dir().join(DEFAULT_RELATIVE_PATH)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return `key` from `section`, re-reading the file under a shared lock.
    pub fn get(&self, section: &str, key: &str) -> AicmResult<Option<String>> {
        let _lock = self.lock_shared()?;
        let sections = self.read_sections()?;
        Ok(sections
            .get(section)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    /// Return `key` from `section`, or `fallback` when the section or key is
    /// missing.
    pub fn get_or(&self, section: &str, key: &str, fallback: &str) -> AicmResult<String> {
        Ok(self.get(section, key)?.unwrap_or_else(|| fallback.to_owned()))
    }

    /// Return the whole `section` as a map, or `None` when absent.
    pub fn get_section(&self, section: &str) -> AicmResult<Option<BTreeMap<String, String>>> {
        let _lock = self.lock_shared()?;
        let sections = self.read_sections()?;
        Ok(sections.get(section).cloned())
    }

    /// Persist `key = value` under `section`. Creates parent directories and
    /// the file on first write; last writer wins at section granularity.
    pub fn set(&self, section: &str, key: &str, value: &str) -> AicmResult<()> {
        self.mutate(|sections| {
            sections
                .entry(section.to_owned())
                .or_default()
                .insert(key.to_owned(), value.to_owned());
        })
    }

    /// Drop `section` and everything in it. A no-op when absent.
    pub fn remove_section(&self, section: &str) -> AicmResult<()> {
        self.mutate(|sections| {
            sections.remove(section);
        })
    }

    fn mutate(&self, apply: impl FnOnce(&mut Sections)) -> AicmResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let _lock = self.lock_exclusive()?;
        let mut sections = self.read_sections()?;
        apply(&mut sections);
        self.write_atomic(&sections)
    }

    fn read_sections(&self) -> AicmResult<Sections> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(parse(&content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Sections::new()),
            Err(err) => Err(err.into()),
        }
    }

    fn write_atomic(&self, sections: &Sections) -> AicmResult<()> {
        let tmp_path = self.path.with_extension("tmp");
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(serialize(sections).as_bytes())?;
        tmp.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn lock_file(&self) -> AicmResult<File> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut lock_path = self.path.as_os_str().to_owned();
        lock_path.push(".lock");
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(PathBuf::from(lock_path))?;
        Ok(file)
    }

    fn lock_shared(&self) -> AicmResult<File> {
        let file = self.lock_file()?;
        FileExt::lock_shared(&file)?;
        Ok(file)
    }

    fn lock_exclusive(&self) -> AicmResult<File> {
        let file = self.lock_file()?;
        FileExt::lock_exclusive(&file)?;
        Ok(file)
    }
}

/// Best-effort home directory lookup without pulling in a platform crate.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn parse(content: &str) -> Sections {
    let mut sections = Sections::new();
    let mut current: Option<String> = None;
    for raw_line in content.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.trim().to_owned();
            sections.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }
        if let (Some(section), Some(eq)) = (&current, line.find('=')) {
            let key = line[..eq].trim().to_owned();
            let value = line[eq + 1..].trim().to_owned();
            if !key.is_empty() {
                sections
                    .entry(section.clone())
                    .or_default()
                    .insert(key, value);
            }
        }
    }
    sections
}

fn serialize(sections: &Sections) -> String {
    let mut out = String::new();
    for (name, entries) in sections {
        out.push('[');
        out.push_str(name);
        out.push_str("]\n");
        for (key, value) in entries {
            out.push_str(key);
            out.push_str(" = ");
            out.push_str(value);
            out.push('\n');
        }
        out.push('\n');
    }
    out
}
