//! The archive's tab-separated file report.
//!
//! Only three columns matter to the download engine: the record id, the
//! semicolon-delimited `fastq_ftp` locations and the matching `fastq_md5`
//! digests. Every other column is carried through untouched so it can be
//! filtered on and written back out in the aggregate table.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, WriterBuilder};

use crate::error::EnaError;

pub const ID_COLUMNS: &[&str] = &["run_accession", "accession"];
pub const LOCATION_COLUMN: &str = "fastq_ftp";
pub const DIGEST_COLUMN: &str = "fastq_md5";
pub const PLATFORM_COLUMN: &str = "instrument_platform";
pub const LIBRARY_SOURCE_COLUMN: &str = "library_source";

/// Columns requested from the file report and search endpoints.
pub const REPORT_FIELDS: &[&str] = &[
    "run_accession",
    "study_accession",
    "sample_accession",
    "experiment_accession",
    "instrument_platform",
    "instrument_model",
    "library_layout",
    "library_source",
    "library_strategy",
    "scientific_name",
    "tax_id",
    "fastq_bytes",
    "fastq_ftp",
    "fastq_md5",
];

/// One row of the file report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRecord {
    pub id: String,
    pub locations: Vec<String>,
    pub digests: Vec<String>,
    pub fields: BTreeMap<String, String>,
}

impl MetadataRecord {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataTable {
    pub headers: Vec<String>,
    pub records: Vec<MetadataRecord>,
}

impl MetadataTable {
    pub fn from_path(path: &Path) -> Result<Self, EnaError> {
        let file = File::open(path).map_err(|err| EnaError::MetadataParse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Self::from_reader(file, path)
    }

    pub fn from_reader<R: Read>(reader: R, source: &Path) -> Result<Self, EnaError> {
        let parse_err = |err: csv::Error| EnaError::MetadataParse {
            path: source.to_path_buf(),
            message: err.to_string(),
        };
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = reader
            .headers()
            .map_err(parse_err)?
            .iter()
            .map(|value| value.trim().to_string())
            .collect();
        let id_column = ID_COLUMNS
            .iter()
            .find_map(|name| headers.iter().position(|header| header == name));
        let stem = source
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| "table".to_string());

        let mut records = Vec::new();
        for (index, row) in reader.records().enumerate() {
            let row = row.map_err(parse_err)?;
            let fields: BTreeMap<String, String> = headers
                .iter()
                .zip(row.iter())
                .map(|(header, value)| (header.clone(), value.trim().to_string()))
                .collect();
            let id = id_column
                .and_then(|column| row.get(column))
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("{stem}-row-{}", index + 1));
            records.push(MetadataRecord {
                id,
                locations: split_list(fields.get(LOCATION_COLUMN)),
                digests: split_list(fields.get(DIGEST_COLUMN)),
                fields,
            });
        }

        Ok(Self { headers, records })
    }

    /// Concatenate tables: union of columns in first-seen order.
    pub fn concat(tables: impl IntoIterator<Item = MetadataTable>) -> Self {
        let mut out = MetadataTable::default();
        for table in tables {
            for header in table.headers {
                if !out.headers.contains(&header) {
                    out.headers.push(header);
                }
            }
            out.records.extend(table.records);
        }
        out
    }

    /// Serialize the records accepted by `keep` as TSV; absent cells are empty.
    pub fn to_tsv<F>(&self, keep: F) -> Result<Vec<u8>, EnaError>
    where
        F: Fn(&MetadataRecord) -> bool,
    {
        let write_err = |err: csv::Error| EnaError::Filesystem(err.to_string());
        let mut writer = WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(Vec::new());
        writer.write_record(&self.headers).map_err(write_err)?;
        for record in self.records.iter().filter(|record| keep(record)) {
            writer
                .write_record(
                    self.headers
                        .iter()
                        .map(|header| record.field(header).unwrap_or("")),
                )
                .map_err(write_err)?;
        }
        writer
            .into_inner()
            .map_err(|err| EnaError::Filesystem(err.to_string()))
    }
}

fn split_list(value: Option<&String>) -> Vec<String> {
    match value.map(|value| value.trim()) {
        None | Some("") => Vec::new(),
        Some(value) => value.split(';').map(|item| item.trim().to_string()).collect(),
    }
}

/// Record selection applied before any work is scheduled. Unset criteria
/// accept everything; set criteria compare case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub platform: Option<String>,
    pub library_source: Option<String>,
}

impl RecordFilter {
    pub fn is_empty(&self) -> bool {
        self.platform.is_none() && self.library_source.is_none()
    }

    pub fn matches(&self, record: &MetadataRecord) -> bool {
        field_matches(record, PLATFORM_COLUMN, self.platform.as_deref())
            && field_matches(record, LIBRARY_SOURCE_COLUMN, self.library_source.as_deref())
    }
}

fn field_matches(record: &MetadataRecord, column: &str, wanted: Option<&str>) -> bool {
    let Some(wanted) = wanted else {
        return true;
    };
    record
        .field(column)
        .map(|value| value.eq_ignore_ascii_case(wanted))
        .unwrap_or(false)
}
