//! Program library, media directory, and file-transfer staging.
//!
//! Programs persist as one XML file per guid and are restored on startup.
//! File transfers write into a staging directory and only an explicit commit
//! atomically renames the finished file into the media directory, so the
//! media directory never contains a half-received file.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use ledwall_core::program::parser::{parse_program_file, ParseError};
use ledwall_core::{HardwareConfig, Program, ProgramId};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize program XML: {0}")]
    Xml(#[from] quick_xml::DeError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("failed to parse hardware config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize hardware config: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("staged file {name}: expected {expected} bytes, received {actual}")]
    SizeMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },
    #[error("no staged file for session {0}")]
    NotStaged(Uuid),
    #[error("unsafe file name `{0}`")]
    UnsafeFileName(String),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// File names must be plain names, never paths.
fn check_file_name(name: &str) -> Result<(), StorageError> {
    let bad = name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.starts_with('.');
    if bad {
        return Err(StorageError::UnsafeFileName(name.to_string()));
    }
    Ok(())
}

/// On-disk home of programs, media, staging, and the hardware config.
pub struct ProgramLibrary {
    programs_dir: PathBuf,
    media_dir: PathBuf,
    staging_dir: PathBuf,
    hwconfig_path: PathBuf,
}

impl ProgramLibrary {
    pub fn new(
        programs_dir: PathBuf,
        media_dir: PathBuf,
        staging_dir: PathBuf,
        hwconfig_path: PathBuf,
    ) -> Self {
        Self {
            programs_dir,
            media_dir,
            staging_dir,
            hwconfig_path,
        }
    }

    /// Creates the directory layout.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if a directory cannot be created.
    pub fn ensure_dirs(&self) -> Result<(), StorageError> {
        for dir in [&self.programs_dir, &self.media_dir, &self.staging_dir] {
            std::fs::create_dir_all(dir).map_err(io_err(dir))?;
        }
        Ok(())
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    // ── Programs ──────────────────────────────────────────────────────────────

    fn program_path(&self, id: ProgramId) -> PathBuf {
        self.programs_dir.join(format!("{id}.xml"))
    }

    /// Persists one program as XML.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Xml`] or [`StorageError::Io`].
    pub fn save_program(&self, program: &Program) -> Result<(), StorageError> {
        let xml = quick_xml::se::to_string_with_root("program", program)?;
        let path = self.program_path(program.guid);
        std::fs::write(&path, xml).map_err(io_err(&path))?;
        Ok(())
    }

    /// Removes a persisted program; missing files are not an error.
    pub fn delete_program(&self, id: ProgramId) -> Result<(), StorageError> {
        let path = self.program_path(id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }

    /// Loads every parseable program from disk; corrupt files are logged
    /// and skipped so one bad file cannot block startup.
    pub fn load_programs(&self, canvas_width: u32, canvas_height: u32) -> Vec<Program> {
        let entries = match std::fs::read_dir(&self.programs_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.programs_dir.display(), error = %e, "program dir unreadable");
                return Vec::new();
            }
        };
        let mut programs = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "xml") {
                continue;
            }
            match parse_program_file(&path, canvas_width, canvas_height) {
                Ok(program) => programs.push(program),
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "skipping unparseable program");
                }
            }
        }
        info!(count = programs.len(), "programs restored from disk");
        programs
    }

    // ── Hardware config ───────────────────────────────────────────────────────

    /// Persists the hardware configuration as TOML.
    pub fn save_hwconfig(&self, config: &HardwareConfig) -> Result<(), StorageError> {
        let text = toml::to_string_pretty(config)?;
        std::fs::write(&self.hwconfig_path, text).map_err(io_err(&self.hwconfig_path))?;
        Ok(())
    }

    /// Loads the persisted hardware configuration, if one exists.
    pub fn load_hwconfig(&self) -> Result<Option<HardwareConfig>, StorageError> {
        match std::fs::read_to_string(&self.hwconfig_path) {
            Ok(text) => Ok(Some(toml::from_str(&text)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Io {
                path: self.hwconfig_path.clone(),
                source,
            }),
        }
    }

    // ── Media & staging ───────────────────────────────────────────────────────

    fn staging_path(&self, session: Uuid) -> PathBuf {
        self.staging_dir.join(format!("{session}.part"))
    }

    /// Opens (truncates) the staging file for a session.
    pub fn stage_begin(&self, session: Uuid, name: &str) -> Result<(), StorageError> {
        check_file_name(name)?;
        let path = self.staging_path(session);
        std::fs::write(&path, []).map_err(io_err(&path))?;
        Ok(())
    }

    /// Appends one chunk to the staged file.
    pub fn stage_append(&self, session: Uuid, chunk: &[u8]) -> Result<(), StorageError> {
        use std::io::Write;
        let path = self.staging_path(session);
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => StorageError::NotStaged(session),
                _ => StorageError::Io {
                    path: path.clone(),
                    source: e,
                },
            })?;
        file.write_all(chunk).map_err(io_err(&path))?;
        Ok(())
    }

    /// Verifies the staged size and atomically renames the file into the
    /// media directory.  On mismatch the staged file is discarded.
    pub fn stage_commit(
        &self,
        session: Uuid,
        name: &str,
        expected_size: u64,
    ) -> Result<(), StorageError> {
        check_file_name(name)?;
        let staged = self.staging_path(session);
        let meta = std::fs::metadata(&staged).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotStaged(session),
            _ => StorageError::Io {
                path: staged.clone(),
                source: e,
            },
        })?;
        if meta.len() != expected_size {
            let actual = meta.len();
            let _ = std::fs::remove_file(&staged);
            return Err(StorageError::SizeMismatch {
                name: name.to_string(),
                expected: expected_size,
                actual,
            });
        }
        let target = self.media_dir.join(name);
        std::fs::rename(&staged, &target).map_err(io_err(&target))?;
        info!(name, size = expected_size, "media file committed");
        Ok(())
    }

    /// Discards a staged file, if any.
    pub fn stage_abort(&self, session: Uuid) {
        let _ = std::fs::remove_file(self.staging_path(session));
    }

    /// Media directory listing as (name, size) pairs.
    pub fn list_media(&self) -> Result<Vec<(String, u64)>, StorageError> {
        let entries =
            std::fs::read_dir(&self.media_dir).map_err(io_err(&self.media_dir))?;
        let mut files = Vec::new();
        for entry in entries.flatten() {
            if let (Some(name), Ok(meta)) = (entry.file_name().to_str(), entry.metadata()) {
                if meta.is_file() {
                    files.push((name.to_string(), meta.len()));
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// Deletes one media file; missing files are not an error.
    pub fn delete_media(&self, name: &str) -> Result<(), StorageError> {
        check_file_name(name)?;
        let path = self.media_dir.join(name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ledwall_core::program::model::{
        Area, Content, ContentHolder, FontSpec, Rect, Rotation, Scene, Schedule, TextContent,
        Transition,
    };

    fn temp_library() -> (ProgramLibrary, PathBuf) {
        let root = std::env::temp_dir().join(format!("ledwall_test_{}", Uuid::new_v4()));
        let library = ProgramLibrary::new(
            root.join("programs"),
            root.join("media"),
            root.join("staging"),
            root.join("hwconfig.toml"),
        );
        library.ensure_dirs().expect("dirs");
        (library, root)
    }

    fn sample_program() -> Program {
        Program {
            guid: Uuid::new_v4(),
            name: "persisted".to_string(),
            schedule: Schedule::default(),
            scenes: vec![Scene {
                name: "s".to_string(),
                duration_ms: 4_000,
                transition: Transition::default(),
                areas: vec![Area {
                    guid: Uuid::new_v4(),
                    name: String::new(),
                    z: 0,
                    rotation: Rotation::Deg0,
                    alpha: 255,
                    rect: Rect { x: 0, y: 0, width: 64, height: 32 },
                    border: None,
                    content: ContentHolder {
                        item: Content::StaticText(TextContent {
                            string: "SAVED".to_string(),
                            font: FontSpec::default(),
                            align: "center".to_string(),
                            speed: 50,
                        }),
                    },
                }],
            }],
        }
    }

    #[test]
    fn test_program_save_load_round_trip() {
        let (library, root) = temp_library();
        let program = sample_program();

        library.save_program(&program).expect("save");
        let restored = library.load_programs(128, 64);

        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0], program);
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_corrupt_program_file_is_skipped() {
        let (library, root) = temp_library();
        library.save_program(&sample_program()).expect("save");
        std::fs::write(root.join("programs/broken.xml"), "<not a program>").expect("write");

        let restored = library.load_programs(128, 64);
        assert_eq!(restored.len(), 1);
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_delete_program_is_idempotent() {
        let (library, root) = temp_library();
        let program = sample_program();
        library.save_program(&program).expect("save");

        library.delete_program(program.guid).expect("delete");
        library.delete_program(program.guid).expect("delete again");
        assert!(library.load_programs(128, 64).is_empty());
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_staging_commit_moves_file_into_media() {
        let (library, root) = temp_library();
        let session = Uuid::new_v4();

        library.stage_begin(session, "logo.png").expect("begin");
        library.stage_append(session, b"abcd").expect("append");
        library.stage_append(session, b"efgh").expect("append");
        library.stage_commit(session, "logo.png", 8).expect("commit");

        let media = library.list_media().expect("list");
        assert_eq!(media, vec![("logo.png".to_string(), 8)]);
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_staging_commit_size_mismatch_discards_file() {
        let (library, root) = temp_library();
        let session = Uuid::new_v4();

        library.stage_begin(session, "x.bin").expect("begin");
        library.stage_append(session, b"abc").expect("append");
        let err = library.stage_commit(session, "x.bin", 99).expect_err("mismatch");

        assert!(matches!(err, StorageError::SizeMismatch { actual: 3, .. }));
        assert!(library.list_media().expect("list").is_empty());
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_chunk_without_stage_begin_fails() {
        let (library, root) = temp_library();
        let session = Uuid::new_v4();
        assert!(matches!(
            library.stage_append(session, b"zz"),
            Err(StorageError::NotStaged(_))
        ));
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_path_traversal_names_rejected() {
        let (library, root) = temp_library();
        for name in ["../evil", "a/b", "", ".hidden"] {
            assert!(matches!(
                library.delete_media(name),
                Err(StorageError::UnsafeFileName(_))
            ), "name {name:?}");
        }
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_hwconfig_round_trip() {
        let (library, root) = temp_library();
        assert!(library.load_hwconfig().expect("load").is_none());

        let config = HardwareConfig::default();
        library.save_hwconfig(&config).expect("save");
        assert_eq!(library.load_hwconfig().expect("load"), Some(config));
        std::fs::remove_dir_all(&root).ok();
    }
}
