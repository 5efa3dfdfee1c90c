//! Handing the finished image to the user.

use crate::rendering::CompositeResult;
use crate::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Looks up user-facing labels
pub trait Translator: Send + Sync {
    fn translate(&self, key: &str) -> String;
}

/// Returns keys unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTranslator;

impl Translator for IdentityTranslator {
    fn translate(&self, key: &str) -> String {
        key.to_string()
    }
}

/// Flat `{ "key": "label" }` catalog; unknown keys fall back to the key itself
#[derive(Debug, Clone, Default)]
pub struct CatalogTranslator {
    entries: HashMap<String, String>,
}

impl CatalogTranslator {
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let entries: HashMap<String, String> = serde_json::from_str(s)?;
        Ok(Self { entries })
    }
}

impl Translator for CatalogTranslator {
    fn translate(&self, key: &str) -> String {
        self.entries.get(key).cloned().unwrap_or_else(|| key.to_string())
    }
}

/// Destination of a finished file (the "save as" step)
pub trait DownloadSink: Send + Sync {
    fn save(&self, filename: &str, bytes: &[u8]) -> Result<()>;
}

/// Writes files into a directory
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }
}

impl DownloadSink for DirectorySink {
    fn save(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| Error::EmitError(format!("Failed to create {}: {}", self.dir.display(), e)))?;
        let path = self.dir.join(filename);
        std::fs::write(&path, bytes)
            .map_err(|e| Error::EmitError(format!("Failed to write {}: {}", path.display(), e)))?;
        log::info!("saved {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }
}

/// What was handed to the sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedFile {
    pub filename: String,
    pub bytes: usize,
}

/// The payload is always PNG, so is the name
pub const FILE_EXTENSION: &str = "png";

/// Encodes the composite and saves it under a translated name
pub struct DownloadEmitter {
    translator: Box<dyn Translator>,
    sink: Box<dyn DownloadSink>,
}

impl DownloadEmitter {
    pub fn new(translator: Box<dyn Translator>, sink: Box<dyn DownloadSink>) -> Self {
        Self { translator, sink }
    }

    pub fn translator(&self) -> &dyn Translator {
        self.translator.as_ref()
    }

    /// `<translated stem>.png`, safe to use as a file name
    pub fn filename(&self, stem: &str) -> String {
        format!("{}.{}", sanitize_filename(&self.translator.translate(stem)), FILE_EXTENSION)
    }

    pub fn emit(&self, composite: &CompositeResult, stem: &str) -> Result<EmittedFile> {
        let filename = self.filename(stem);
        let png = composite.to_png()?;
        self.sink.save(&filename, &png)?;
        Ok(EmittedFile { filename, bytes: png.len() })
    }
}

/// Replace characters that are not allowed in file names on common platforms
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('.').trim();
    if cleaned.is_empty() {
        "export".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::{compose, Bitmap};
    use image::{Rgba, RgbaImage};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<(String, usize)>>>);

    impl DownloadSink for Recorder {
        fn save(&self, filename: &str, bytes: &[u8]) -> Result<()> {
            self.0.lock().unwrap().push((filename.to_string(), bytes.len()));
            Ok(())
        }
    }

    #[test]
    fn sanitize_replaces_reserved_characters() {
        assert_eq!(sanitize_filename("Cases: 2024/Q1"), "Cases_ 2024_Q1");
        assert_eq!(sanitize_filename("  ..  "), "export");
        assert_eq!(sanitize_filename("Rapport d'activité"), "Rapport d'activité");
    }

    #[test]
    fn filename_uses_translation() {
        let mut entries = HashMap::new();
        entries.insert("report.cases_map".to_string(), "Karte der Fälle".to_string());
        let emitter = DownloadEmitter::new(
            Box::new(CatalogTranslator::new(entries)),
            Box::new(Recorder::default()),
        );
        assert_eq!(emitter.filename("report.cases_map"), "Karte der Fälle.png");
        assert_eq!(emitter.filename("untranslated"), "untranslated.png");
    }

    #[test]
    fn emit_hands_png_to_sink() {
        let rec = Recorder::default();
        let emitter = DownloadEmitter::new(Box::new(IdentityTranslator), Box::new(rec.clone()));
        let bmp = Bitmap::new(RgbaImage::from_pixel(3, 3, Rgba([9, 9, 9, 255])));
        let composite = compose(&bmp, &bmp).unwrap();
        let file = emitter.emit(&composite, "Report").unwrap();
        assert_eq!(file.filename, "Report.png");
        let saved = rec.0.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0], ("Report.png".to_string(), file.bytes));
    }

    #[test]
    fn name_extension_matches_png_payload() {
        let dir = std::env::temp_dir().join(format!("visual-export-png-{}", std::process::id()));
        let emitter = DownloadEmitter::new(Box::new(IdentityTranslator), Box::new(DirectorySink::new(&dir)));
        let bmp = Bitmap::new(RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 255])));
        let file = emitter.emit(&compose(&bmp, &bmp).unwrap(), "r.jpg").unwrap();
        assert_eq!(file.filename, "r.jpg.png");
        let bytes = std::fs::read(dir.join(&file.filename)).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn directory_sink_writes_file() {
        let dir = std::env::temp_dir().join(format!("visual-export-sink-{}", std::process::id()));
        let sink = DirectorySink::new(&dir);
        sink.save("a.png", b"abc").unwrap();
        assert_eq!(std::fs::read(dir.join("a.png")).unwrap(), b"abc");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn catalog_from_json() {
        let t = CatalogTranslator::from_json_str(r#"{"title": "Case map"}"#).unwrap();
        assert_eq!(t.translate("title"), "Case map");
        assert!(CatalogTranslator::from_json_str("[1, 2]").is_err());
    }
}
