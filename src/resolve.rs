use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::{Digest, Location};
use crate::error::ResolutionError;
use crate::metadata::MetadataRecord;
use crate::transport::sweep_partials;

/// One remote file of a work item and where it lands locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePair {
    pub location: Location,
    pub digest: Digest,
    pub path: PathBuf,
}

/// The engine's unit of scheduling: every file of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub id: String,
    pub destination: PathBuf,
    pub pairs: Vec<FilePair>,
}

/// Pair a record's locations with its digests and place each file under
/// `dest_root`, creating the directory if needed.
pub fn resolve(record: &MetadataRecord, dest_root: &Path) -> Result<WorkItem, ResolutionError> {
    let malformed = |reason: String| ResolutionError::Malformed {
        id: record.id.clone(),
        reason,
    };

    if record.locations.is_empty() {
        return Err(malformed("no file locations".to_string()));
    }
    if record.digests.is_empty() {
        return Err(malformed("no digests".to_string()));
    }
    if record.locations.len() != record.digests.len() {
        return Err(malformed(format!(
            "{} locations but {} digests",
            record.locations.len(),
            record.digests.len()
        )));
    }

    let mut names = HashSet::new();
    let mut pairs = Vec::with_capacity(record.locations.len());
    for (raw_location, raw_digest) in record.locations.iter().zip(&record.digests) {
        let location: Location = raw_location
            .parse()
            .map_err(|_| malformed(format!("bad location {raw_location:?}")))?;
        let digest: Digest = raw_digest
            .parse()
            .map_err(|_| malformed(format!("bad digest {raw_digest:?}")))?;
        let name = location
            .file_name()
            .ok_or_else(|| malformed(format!("no file name in {location}")))?
            .to_string();
        if !names.insert(name.clone()) {
            return Err(malformed(format!("duplicate file name {name}")));
        }
        pairs.push(FilePair {
            location,
            digest,
            path: dest_root.join(&name),
        });
    }

    fs::create_dir_all(dest_root).map_err(|err| ResolutionError::Filesystem {
        path: dest_root.to_path_buf(),
        message: err.to_string(),
    })?;
    let swept = sweep_partials(dest_root, names.iter().map(String::as_str));
    if swept > 0 {
        tracing::info!("Removed {swept} unfinished downloads for {}", record.id);
    }

    Ok(WorkItem {
        id: record.id.clone(),
        destination: dest_root.to_path_buf(),
        pairs,
    })
}

/// Work list built from a batch of records.
#[derive(Debug, Default)]
pub struct ResolvedWork {
    pub items: Vec<WorkItem>,
    pub rejected: Vec<ResolutionError>,
}

/// Resolve every record, skipping malformed ones and repeated ids. Only a
/// failure to create a destination directory aborts.
pub fn resolve_all<'a, I, F>(records: I, dest_for: F) -> Result<ResolvedWork, ResolutionError>
where
    I: IntoIterator<Item = &'a MetadataRecord>,
    F: Fn(&MetadataRecord) -> PathBuf,
{
    let mut seen = HashSet::new();
    let mut work = ResolvedWork::default();
    for record in records {
        if !seen.insert(record.id.clone()) {
            tracing::debug!(id = %record.id, "record listed more than once");
            continue;
        }
        match resolve(record, &dest_for(record)) {
            Ok(item) => work.items.push(item),
            Err(err @ ResolutionError::Malformed { .. }) => {
                tracing::warn!("Skipping record: {err}");
                work.rejected.push(err);
            }
            Err(err) => return Err(err),
        }
    }
    Ok(work)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use assert_matches::assert_matches;

    use super::*;

    fn record(id: &str, locations: &[&str], digests: &[&str]) -> MetadataRecord {
        MetadataRecord {
            id: id.to_string(),
            locations: locations.iter().map(|value| value.to_string()).collect(),
            digests: digests.iter().map(|value| value.to_string()).collect(),
            fields: BTreeMap::new(),
        }
    }

    #[test]
    fn pairs_positionally() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("R1");
        let item = resolve(
            &record(
                "R1",
                &["host/a.fastq.gz", "host/b.fastq.gz"],
                &["d1", "d2"],
            ),
            &dest,
        )
        .unwrap();
        assert!(dest.is_dir());
        assert_eq!(item.pairs.len(), 2);
        assert_eq!(item.pairs[0].path, dest.join("a.fastq.gz"));
        assert_eq!(item.pairs[0].digest.as_str(), "d1");
        assert_eq!(item.pairs[1].location.as_str(), "host/b.fastq.gz");
        assert_eq!(item.pairs[1].digest.as_str(), "d2");
    }

    #[test]
    fn leftover_partials_are_swept() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("R1");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join(".a.fastq.gz.k2Jd9x.part"), b"partial").unwrap();
        std::fs::write(dest.join("a.fastq.gz"), b"complete").unwrap();
        std::fs::write(dest.join("notes.txt"), b"kept").unwrap();

        resolve(&record("R1", &["host/a.fastq.gz"], &["d1"]), &dest).unwrap();

        assert!(!dest.join(".a.fastq.gz.k2Jd9x.part").exists());
        assert!(dest.join("a.fastq.gz").is_file());
        assert!(dest.join("notes.txt").is_file());
    }

    #[test]
    fn unequal_lengths_are_malformed() {
        let temp = tempfile::tempdir().unwrap();
        let err = resolve(
            &record("R3", &["host/a.fastq.gz", "host/b.fastq.gz"], &["d1"]),
            temp.path(),
        )
        .unwrap_err();
        assert_matches!(err, ResolutionError::Malformed { ref id, .. } if id == "R3");
    }

    #[test]
    fn empty_lists_are_malformed() {
        let temp = tempfile::tempdir().unwrap();
        assert_matches!(
            resolve(&record("R4", &[], &[]), temp.path()),
            Err(ResolutionError::Malformed { .. })
        );
        assert_matches!(
            resolve(&record("R5", &["host/a.fastq.gz"], &[]), temp.path()),
            Err(ResolutionError::Malformed { .. })
        );
    }

    #[test]
    fn malformed_records_are_skipped_not_fatal() {
        let temp = tempfile::tempdir().unwrap();
        let records = vec![
            record("R1", &["host/a.fastq.gz"], &["d1"]),
            record("BAD", &["host/x.fastq.gz", "host/y.fastq.gz"], &["d1"]),
            record("R1", &["host/a.fastq.gz"], &["d1"]),
            record("R2", &["host/b.fastq.gz"], &["d2"]),
        ];
        let work = resolve_all(&records, |record| temp.path().join(&record.id)).unwrap();
        let ids: Vec<_> = work.items.iter().map(|item| item.id.as_str()).collect();
        assert_eq!(ids, vec!["R1", "R2"]);
        assert_eq!(work.rejected.len(), 1);
    }

    #[test]
    fn uncreatable_destination_is_fatal() {
        let temp = tempfile::tempdir().unwrap();
        let blocker = temp.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let records = vec![record("R1", &["host/a.fastq.gz"], &["d1"])];
        let err = resolve_all(&records, |_| blocker.join("R1")).unwrap_err();
        assert_matches!(err, ResolutionError::Filesystem { .. });
    }
}
