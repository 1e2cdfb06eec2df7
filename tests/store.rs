use camino::Utf8PathBuf;

use ena_fetch::store::Store;

#[test]
fn atomic_write_replaces_content_without_leftovers() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let path = root.join("metadata_2024-01-01.tsv");

    Store::write_bytes_atomic(&path, b"run_accession\nSRR1\n").unwrap();
    Store::write_bytes_atomic(&path, b"run_accession\nSRR2\n").unwrap();

    assert_eq!(
        std::fs::read_to_string(path.as_std_path()).unwrap(),
        "run_accession\nSRR2\n"
    );
    let names: Vec<_> = std::fs::read_dir(temp.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(names.len(), 1);
}

#[test]
fn ensure_creates_layout() {
    let temp = tempfile::tempdir().unwrap();
    let store = Store::from_path(&temp.path().join("ENA_out")).unwrap();
    store.ensure_root().unwrap();
    store.ensure_tmp().unwrap();
    store.ensure_genomes().unwrap();
    assert!(store.tmp_dir().as_std_path().is_dir());
    assert!(store.genomes_dir().as_std_path().is_dir());
    assert!(store.record_dir("SRR1").starts_with(store.root()));
}

#[test]
fn blocked_root_is_a_filesystem_error() {
    let temp = tempfile::tempdir().unwrap();
    let blocker = temp.path().join("file");
    std::fs::write(&blocker, b"x").unwrap();
    let store = Store::from_path(&blocker.join("ENA_out")).unwrap();
    assert!(matches!(
        store.ensure_root(),
        Err(ena_fetch::error::EnaError::Filesystem(_))
    ));
}
