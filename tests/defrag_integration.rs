//! Defragmentation end to end: plan, relocate, shrink

use bunkr_rs::core::defrag::plan;
use bunkr_rs::{
    Archive, ArchiveBuilder, CancelToken, CipherAlgorithm, CompressionMethod, FragmentedRange,
    PasswordProvider, SecureRandom,
};
use zeroize::Zeroizing;

const PASSWORD: &[u8] = b"defrag password";

fn create(path: &std::path::Path, encryption: Option<CipherAlgorithm>) -> Archive {
    ArchiveBuilder::new(path)
        .block_size(32)
        .encryption(encryption)
        .compression(CompressionMethod::Deflate)
        .pbkdf2_iterations(4096)
        .salt_len(16)
        .password(Zeroizing::new(PASSWORD.to_vec()))
        .create()
        .unwrap()
}

fn content(tag: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| tag.wrapping_add((i * 31 % 251) as u8)).collect()
}

/// Archive with holes: a removed file, an orphaned old version, files after both
fn fragmented(path: &std::path::Path, encryption: Option<CipherAlgorithm>) -> (Archive, Vec<(String, Vec<u8>)>) {
    let mut archive = create(path, encryption);
    archive.mkdir("/docs", false).unwrap();
    let files = vec![
        ("/docs/a.txt".to_string(), content(1, 400)),
        ("/docs/b.txt".to_string(), content(2, 900)),
        ("/c.bin".to_string(), content(3, 250)),
        ("/d.bin".to_string(), content(4, 1200)),
    ];
    archive.write_file("/doomed", &content(9, 700)).unwrap();
    for (name, data) in &files {
        archive.write_file(name, data).unwrap();
    }
    // leaves the first version's blocks orphaned
    archive.write_file("/docs/b.txt", &files[1].1).unwrap();
    archive.remove("/doomed", false).unwrap();
    (archive, files)
}

fn assert_compact(archive: &Archive) {
    let occupied = archive.inventory().occupied_blocks();
    assert_eq!(occupied, FragmentedRange::with_range(0, occupied.size() as i64));
    assert_eq!(archive.block_count(), occupied.size());
}

#[test]
fn test_defragment_compacts_and_keeps_content() {
    for encryption in [None, Some(CipherAlgorithm::Aes256Ctr)] {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("defrag.bunkr");
        let (mut archive, files) = fragmented(&path, encryption);
        assert!(!plan(archive.inventory()).is_empty());
        let before = archive.block_count();

        let mut calls = Vec::new();
        let report = archive
            .defragment(&CancelToken::new(), |done, total| calls.push((done, total)))
            .unwrap();

        assert!(report.completed);
        assert_eq!(report.moved, report.planned);
        assert_eq!(calls.len(), report.planned);
        assert_eq!(report.blocks_before, before);
        assert!(report.blocks_after < before);
        assert_compact(&archive);
        assert!(plan(archive.inventory()).is_empty());

        for (name, data) in &files {
            assert_eq!(&archive.read_file(name).unwrap(), data, "{}", name);
        }

        // the compacted layout is what is on disk
        drop(archive);
        let passwords = PasswordProvider::with_password(Zeroizing::new(PASSWORD.to_vec())).unwrap();
        let archive = Archive::open(&path, passwords, SecureRandom::system()).unwrap();
        assert_compact(&archive);
        for (name, data) in &files {
            assert_eq!(&archive.read_file(name).unwrap(), data);
        }
    }
}

#[test]
fn test_compact_archive_is_left_alone() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("compact.bunkr");
    let mut archive = create(&path, None);
    archive.write_file("/one", &content(1, 100)).unwrap();
    archive.write_file("/two", &content(2, 100)).unwrap();
    let blocks = archive.block_count();

    let report = archive.defragment(&CancelToken::new(), |_, _| {}).unwrap();
    assert_eq!(report.planned, 0);
    assert!(report.completed);
    assert_eq!(archive.block_count(), blocks);
}

#[test]
fn test_defragment_trims_trailing_orphans() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tail.bunkr");
    let mut archive = create(&path, None);
    archive.write_file("/keep", &content(5, 64)).unwrap();
    archive.write_file("/drop", &content(6, 640)).unwrap();
    archive.remove("/drop", false).unwrap();

    // nothing to move, only the region to cut
    assert!(plan(archive.inventory()).is_empty());
    let report = archive.defragment(&CancelToken::new(), |_, _| {}).unwrap();
    assert_eq!(report.moved, 0);
    assert!(report.blocks_after < report.blocks_before);
    assert_compact(&archive);
    assert_eq!(archive.read_file("/keep").unwrap(), content(5, 64));
}

#[test]
fn test_cancelled_defragment_keeps_files_readable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cancel.bunkr");
    let (mut archive, files) = fragmented(&path, Some(CipherAlgorithm::Twofish256Ctr));
    let before = archive.block_count();

    let token = CancelToken::new();
    token.cancel();
    let report = archive.defragment(&token, |_, _| {}).unwrap();
    assert!(!report.completed);
    assert_eq!(report.moved, 0);
    assert_eq!(archive.block_count(), before);

    let token = CancelToken::new();
    let stopper = token.clone();
    let report = archive
        .defragment(&token, move |done, _| {
            if done == 1 {
                stopper.cancel();
            }
        })
        .unwrap();
    assert!(!report.completed);
    assert_eq!(report.moved, 1);
    // region is never shrunk by a cancelled run
    assert!(archive.block_count() >= before);
    for (name, data) in &files {
        assert_eq!(&archive.read_file(name).unwrap(), data);
    }
}
