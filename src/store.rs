use std::fs;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDate;

use crate::domain::{Accession, TaxonId};
use crate::error::EnaError;

/// Layout of the output directory.
///
/// ```text
/// <root>/tmp/<acc>.tsv            cached file reports
/// <root>/tmp/tax_<taxid>.{xml,tsv}
/// <root>/<record id>/<file>       one directory per record
/// <root>/genomes/<file>           taxon assemblies
/// <root>/metadata_<date>.tsv      aggregate table
/// ```
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn from_path(root: &Path) -> Result<Self, EnaError> {
        let root = Utf8PathBuf::from_path_buf(root.to_path_buf()).map_err(|path| {
            EnaError::Filesystem(format!("output path is not UTF-8: {}", path.display()))
        })?;
        Ok(Self { root })
    }

    /// `./ENA_out` under the current directory.
    pub fn default_root() -> Result<Utf8PathBuf, EnaError> {
        let cwd = std::env::current_dir().map_err(|err| EnaError::Filesystem(err.to_string()))?;
        Utf8PathBuf::from_path_buf(cwd.join("ENA_out"))
            .map_err(|_| EnaError::Filesystem("invalid working directory path".to_string()))
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn tmp_dir(&self) -> Utf8PathBuf {
        self.root.join("tmp")
    }

    pub fn genomes_dir(&self) -> Utf8PathBuf {
        self.root.join("genomes")
    }

    pub fn record_dir(&self, id: &str) -> Utf8PathBuf {
        self.root.join(sanitize_component(id))
    }

    pub fn report_cache_path(&self, acc: &Accession) -> Utf8PathBuf {
        self.tmp_dir().join(format!("{acc}.tsv"))
    }

    pub fn taxon_cache_path(&self, taxid: &TaxonId, ext: &str) -> Utf8PathBuf {
        self.tmp_dir().join(format!("tax_{taxid}.{ext}"))
    }

    pub fn genome_path(&self, name: &str) -> Utf8PathBuf {
        self.genomes_dir().join(sanitize_component(name))
    }

    pub fn aggregate_table_path(&self, date: NaiveDate) -> Utf8PathBuf {
        self.root
            .join(format!("metadata_{}.tsv", date.format("%Y-%m-%d")))
    }

    pub fn ensure_root(&self) -> Result<(), EnaError> {
        ensure_dir(&self.root)
    }

    pub fn ensure_tmp(&self) -> Result<(), EnaError> {
        ensure_dir(&self.tmp_dir())
    }

    pub fn ensure_genomes(&self) -> Result<(), EnaError> {
        ensure_dir(&self.genomes_dir())
    }

    /// Write through a uniquely named temporary file in the same directory,
    /// then rename over `path`.
    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), EnaError> {
        let parent = path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or(Utf8Path::new("."));
        ensure_dir(parent)?;
        let temp = tempfile::Builder::new()
            .prefix(".ena-fetch")
            .suffix(".tmp")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| EnaError::Filesystem(err.to_string()))?;
        fs::write(temp.path(), content).map_err(|err| EnaError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| EnaError::Filesystem(format!("{path}: {}", err.error)))?;
        Ok(())
    }
}

fn ensure_dir(path: &Utf8Path) -> Result<(), EnaError> {
    fs::create_dir_all(path.as_std_path())
        .map_err(|err| EnaError::Filesystem(format!("{path}: {err}")))
}

fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' => '_',
            ch if ch.is_control() => '_',
            ch => ch,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}
