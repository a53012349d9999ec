//! Write/read round trips through every cipher and compression combination

use bunkr_rs::{
    Archive, ArchiveBuilder, BunkrError, CipherAlgorithm, CompressionMethod, PasswordProvider,
    SecureRandom,
};
use rand::{Rng, RngCore, SeedableRng};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::Path;
use zeroize::Zeroizing;

const PASSWORD: &[u8] = b"round trip password";

fn create(
    path: &Path,
    block_size: u32,
    encryption: Option<CipherAlgorithm>,
    compression: CompressionMethod,
) -> Archive {
    ArchiveBuilder::new(path)
        .block_size(block_size)
        .encryption(encryption)
        .compression(compression)
        .pbkdf2_iterations(4096)
        .salt_len(16)
        .password(Zeroizing::new(PASSWORD.to_vec()))
        .create()
        .unwrap()
}

fn reopen(path: &Path) -> Archive {
    let passwords = PasswordProvider::with_password(Zeroizing::new(PASSWORD.to_vec())).unwrap();
    Archive::open(path, passwords, SecureRandom::system()).unwrap()
}

fn combos() -> Vec<(Option<CipherAlgorithm>, CompressionMethod)> {
    let mut out = Vec::new();
    for enc in [
        None,
        Some(CipherAlgorithm::Aes256Ctr),
        Some(CipherAlgorithm::Twofish256Ctr),
    ] {
        for comp in [CompressionMethod::None, CompressionMethod::Deflate] {
            out.push((enc, comp));
        }
    }
    out
}

fn payload(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; len];
    rng.fill_bytes(&mut data);
    data
}

#[test]
fn test_every_combination_round_trips() {
    for (i, (enc, comp)) in combos().into_iter().enumerate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("combo.bunkr");
        let data = payload(10_000 + i * 37, i as u64);

        {
            let mut archive = create(&path, 256, enc, comp);
            archive.mkdir("/a/b", true).unwrap();
            archive.write_file("/a/b/data.bin", &data).unwrap();
            assert_eq!(archive.read_file("/a/b/data.bin").unwrap(), data);
        }

        let archive = reopen(&path);
        assert_eq!(archive.descriptor().encryption, enc);
        assert_eq!(archive.descriptor().compression, comp);
        let entry = archive.inventory().resolve_file("/a/b/data.bin").unwrap();
        assert_eq!(entry.actual_size(), data.len() as u64);
        assert_eq!(entry.integrity_hash().unwrap(), Sha256::digest(&data).as_slice());
        assert_eq!(entry.encryption().is_some(), enc.is_some());
        assert!(entry.blocks().size() * 256 >= entry.size_on_disk());
        assert_eq!(archive.read_file("/a/b/data.bin").unwrap(), data, "{:?} {:?}", enc, comp);
    }
}

#[test]
fn test_streamed_chunks_match_single_write() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chunks.bunkr");
    let mut archive = create(&path, 64, Some(CipherAlgorithm::Aes256Ctr), CompressionMethod::Deflate);
    let data = b"stream me in odd sized pieces ".repeat(300);

    archive.create_file("/chunked.txt").unwrap();
    let mut writer = archive.open_writer("/chunked.txt").unwrap();
    let mut rng = rand::thread_rng();
    let mut offset = 0;
    while offset < data.len() {
        let n = rng.gen_range(1..200).min(data.len() - offset);
        writer.write_all(&data[offset..offset + n]).unwrap();
        offset += n;
    }
    assert_eq!(writer.bytes_written(), data.len() as u64);
    writer.commit().unwrap();

    let mut reader = archive.open_reader("/chunked.txt").unwrap();
    let mut out = Vec::new();
    let mut buf = [0u8; 7];
    loop {
        let n = reader.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    assert_eq!(out, data);
}

#[test]
fn test_empty_file() {
    for (enc, comp) in combos() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bunkr");
        let mut archive = create(&path, 32, enc, comp);
        archive.write_file("/empty", b"").unwrap();
        assert!(archive.read_file("/empty").unwrap().is_empty());
        archive.verify_file("/empty").unwrap();
        assert_eq!(
            archive.inventory().resolve_file("/empty").unwrap().integrity_hash().unwrap(),
            Sha256::digest(b"").as_slice()
        );
    }
}

#[test]
fn test_block_boundaries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bounds.bunkr");
    let mut archive = create(&path, 32, None, CompressionMethod::None);
    for len in [1usize, 31, 32, 33, 64, 65] {
        let name = format!("/len{}", len);
        let data = payload(len, len as u64);
        archive.write_file(&name, &data).unwrap();
        let entry = archive.inventory().resolve_file(&name).unwrap();
        assert_eq!(entry.size_on_disk(), len as u64);
        assert_eq!(entry.blocks().size(), ((len + 31) / 32) as u64);
        assert_eq!(archive.read_file(&name).unwrap(), data);
    }
    // every block ever appended is accounted for
    assert_eq!(archive.block_count(), 1 + 1 + 1 + 2 + 2 + 3);
}

#[test]
fn test_rewrite_replaces_content() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rewrite.bunkr");
    let mut archive = create(&path, 64, Some(CipherAlgorithm::Twofish256Ctr), CompressionMethod::None);
    archive.write_file("/note.txt", b"first version").unwrap();
    let first_key = archive
        .inventory()
        .resolve_file("/note.txt")
        .unwrap()
        .encryption()
        .unwrap()
        .key()
        .to_vec();

    archive.write_file("/note.txt", b"second, longer version").unwrap();
    let entry = archive.inventory().resolve_file("/note.txt").unwrap();
    assert_ne!(entry.encryption().unwrap().key(), first_key.as_slice());
    assert_eq!(archive.read_file("/note.txt").unwrap(), b"second, longer version");
}

#[test]
fn test_encrypted_content_is_not_visible_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hidden.bunkr");
    let marker = b"THIS-IS-A-VERY-RECOGNISABLE-MARKER".repeat(10);
    {
        let mut archive = create(&path, 128, Some(CipherAlgorithm::Aes256Ctr), CompressionMethod::None);
        archive.write_file("/secret.txt", &marker).unwrap();
        archive.add_tag("/secret.txt", "private").unwrap();
    }
    let raw = std::fs::read(&path).unwrap();
    let needle = &marker[..34];
    assert!(!raw.windows(needle.len()).any(|w| w == needle));
    // the sealed inventory hides names and tags as well
    assert!(!raw.windows(10).any(|w| w == b"secret.txt"));
    assert!(!raw.windows(7).any(|w| w == b"private"));
}

#[test]
fn test_skip_and_partial_reads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("skip.bunkr");
    let mut archive = create(&path, 64, None, CompressionMethod::Deflate);
    let data = payload(5000, 9);
    archive.write_file("/blob", &data).unwrap();

    let mut reader = archive.open_reader("/blob").unwrap();
    assert_eq!(reader.skip(1000).unwrap(), 1000);
    let mut next = [0u8; 16];
    reader.read_exact(&mut next).unwrap();
    assert_eq!(&next[..], &data[1000..1016]);
    assert_eq!(reader.remaining(), 5000 - 1016);
    assert_eq!(reader.skip(10_000).unwrap(), (5000 - 1016) as i64);
    assert_eq!(reader.skip(1).unwrap(), -1);
    reader.finish().unwrap();
}

#[test]
fn test_check_hash_toggle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("toggle.bunkr");
    let mut archive = create(&path, 64, None, CompressionMethod::None);
    archive.write_file("/t", b"toggle").unwrap();

    let mut reader = archive.open_reader("/t").unwrap();
    assert!(reader.check_hash());
    reader.set_check_hash(false).unwrap();
    let mut one = [0u8; 1];
    reader.read_exact(&mut one).unwrap();
    assert!(matches!(
        reader.set_check_hash(true),
        Err(BunkrError::InvalidArgument(_))
    ));
}
