mod common;

use cask_core::blob::{chunk_key, MemoryBlobStore};
use cask_core::codec::ChunkCodec;
use cask_core::identity::Subject;
use cask_core::meta::{MemoryMetaStore, MetadataStore};
use cask_core::service::CaskService;
use cask_core::ErrorKind;
use common::{harness, harness_with, random_bytes, test_config, FailingBlobStore};
use proptest::prelude::*;
use std::sync::Arc;

fn alice() -> Subject {
    Subject::from_claim(Some("alice")).unwrap()
}

#[test]
fn abcdefghi_reassembles_in_manifest_order() {
    let td = tempfile::tempdir().unwrap();
    let h = harness(td.path(), 4);
    let report = h.svc.upload(&alice(), "letters.txt", b"ABCDEFGHI").unwrap();
    assert_eq!(report.chunks, 3);
    assert_eq!(report.stored_chunks, 3);

    let m = h.svc.manifest(&alice(), &report.file_id).unwrap();
    assert_eq!(m.chunk_ids.len(), 3);
    assert_eq!(m.original_size, 9);
    assert_eq!(m.version, 1);
    assert_eq!(m.chunk_size, 4);
    assert_eq!(h.svc.reconstruct(&m).unwrap(), b"ABCDEFGHI");

    let handle = h.svc.download(&alice(), &report.file_id).unwrap();
    assert!(!handle.is_expired());
    assert_eq!(handle.read_all().unwrap(), b"ABCDEFGHI");
    assert!(handle.path().starts_with(td.path().join("scratch").join("temp-downloads").join("alice")));
}

#[test]
fn boundary_sizes_roundtrip() {
    let td = tempfile::tempdir().unwrap();
    let h = harness(td.path(), 16);
    for (len, expected_chunks) in [(0usize, 0usize), (16, 1), (17, 2), (32, 2), (33, 3)] {
        let data = random_bytes(len, len as u64);
        let r = h.svc.upload(&alice(), "f.bin", &data).unwrap();
        assert_eq!(r.chunks, expected_chunks, "len {len}");
        let m = h.svc.manifest(&alice(), &r.file_id).unwrap();
        assert_eq!(h.svc.reconstruct(&m).unwrap(), data, "len {len}");
    }
}

#[test]
fn empty_file_is_a_zero_chunk_manifest() {
    let td = tempfile::tempdir().unwrap();
    let h = harness(td.path(), 4);
    let r = h.svc.upload(&alice(), "empty", &[]).unwrap();
    let m = h.svc.manifest(&alice(), &r.file_id).unwrap();
    assert!(m.chunk_ids.is_empty());
    assert_eq!(m.original_size, 0);
    assert_eq!(h.blobs.puts(), 0);
    assert!(h.svc.download(&alice(), &r.file_id).unwrap().read_all().unwrap().is_empty());
}

#[test]
fn repeated_content_is_stored_once_and_counted_per_reference() {
    let td = tempfile::tempdir().unwrap();
    // One worker, so the repeated chunk inside a file cannot race itself.
    let h = harness_with(cask_core::config::Config {
        max_parallel_chunks: 1,
        ..test_config(td.path(), 4)
    });
    let bob = Subject::from_claim(Some("bob")).unwrap();

    // "AAAA" appears twice within the file; "BBBB" once.
    let first = h.svc.upload(&alice(), "a", b"AAAABBBBAAAA").unwrap();
    assert_eq!(first.stored_chunks, 2);
    assert_eq!(first.deduplicated_chunks, 1);

    let second = h.svc.upload(&bob, "b", b"AAAABBBBAAAA").unwrap();
    assert_ne!(first.file_id, second.file_id);
    assert_eq!(second.stored_chunks, 0);
    assert_eq!(second.deduplicated_chunks, 3);

    // Physical writes track distinct content, not uploads.
    assert_eq!(h.blobs.puts(), 2);
    let m = h.svc.manifest(&alice(), &first.file_id).unwrap();
    let store = h.svc.chunk_store();
    assert_eq!(store.ref_count(&m.chunk_ids[0]).unwrap(), Some(4));
    assert_eq!(store.ref_count(&m.chunk_ids[1]).unwrap(), Some(2));
    assert_eq!(m.chunk_ids[0], m.chunk_ids[2]);
}

#[test]
fn concurrent_identical_uploads_share_one_blob() {
    const N: usize = 24;
    let td = tempfile::tempdir().unwrap();
    let h = harness(td.path(), 64);
    let payload = b"one chunk of identical content".to_vec();

    std::thread::scope(|s| {
        for i in 0..N {
            let svc = &h.svc;
            let payload = &payload;
            s.spawn(move || {
                let who = Subject::from_claim(Some(&format!("user{i}"))).unwrap();
                svc.upload(&who, "same.txt", payload).unwrap();
            });
        }
    });

    assert_eq!(h.blobs.inner.len().unwrap(), 1);
    let chunks = h.meta.chunks().unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].refs(), N as u64);
    assert_eq!(h.meta.all_manifests().unwrap().len(), N);
}

#[test]
fn lost_chunk_fails_closed() {
    let td = tempfile::tempdir().unwrap();
    let h = harness(td.path(), 4);
    let r = h.svc.upload(&alice(), "x", b"0123456789").unwrap();
    let m = h.svc.manifest(&alice(), &r.file_id).unwrap();

    assert!(h.blobs.inner.remove(&chunk_key(&m.chunk_ids[1])).unwrap());
    assert_eq!(h.svc.reconstruct(&m).unwrap_err().kind(), ErrorKind::Corruption);
    let err = h.svc.download(&alice(), &r.file_id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Corruption);
    assert!(!td.path().join("scratch/temp-downloads/alice").exists());
}

#[test]
fn size_mismatch_is_corruption() {
    let td = tempfile::tempdir().unwrap();
    let h = harness(td.path(), 4);
    let r = h.svc.upload(&alice(), "x", b"abcdef").unwrap();
    let mut m = h.svc.manifest(&alice(), &r.file_id).unwrap();
    m.original_size += 1;
    assert_eq!(h.svc.reconstruct(&m).unwrap_err().kind(), ErrorKind::Corruption);

    for size in [u64::MAX, 0, 4, 9] {
        m.original_size = size;
        assert_eq!(h.svc.reconstruct(&m).unwrap_err().kind(), ErrorKind::Corruption, "{size}");
    }
    m.original_size = 6;
    m.chunk_size = usize::MAX;
    assert_eq!(h.svc.reconstruct(&m).unwrap_err().kind(), ErrorKind::Corruption);
    m.chunk_size = 0;
    assert_eq!(h.svc.reconstruct(&m).unwrap_err().kind(), ErrorKind::Corruption);
}

#[test]
fn failed_chunk_write_leaves_no_manifest_and_keeps_committed_chunks() {
    let td = tempfile::tempdir().unwrap();
    let codec = ChunkCodec::default();
    let refused = codec.encode(b"BBBB").unwrap().id;
    let blobs = Arc::new(FailingBlobStore {
        inner: MemoryBlobStore::new(),
        refuse: chunk_key(&refused),
    });
    let meta = Arc::new(MemoryMetaStore::new());
    let svc = CaskService::new(test_config(td.path(), 4), blobs.clone(), meta.clone()).unwrap();

    let err = svc.upload(&alice(), "x", b"AAAABBBBCCCC").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
    assert!(err.is_retryable());
    assert!(meta.all_manifests().unwrap().is_empty());

    let chunks = meta.chunks().unwrap();
    assert_eq!(chunks.len(), 2);
    assert!(chunks.iter().all(|c| c.refs() == 1 && c.id != refused));
    assert_eq!(blobs.inner.len().unwrap(), 2);
}

#[test]
fn blank_file_name_writes_nothing() {
    let td = tempfile::tempdir().unwrap();
    let h = harness(td.path(), 4);
    let err = h.svc.upload(&alice(), "  ", b"data").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert_eq!(h.blobs.puts(), 0);
    assert!(h.svc.list(&alice()).unwrap().is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn reconstruct_inverts_upload(
        data in proptest::collection::vec(any::<u8>(), 0..600),
        chunk_size in 1usize..96,
    ) {
        let td = tempfile::tempdir().unwrap();
        let h = harness(td.path(), chunk_size);
        let r = h.svc.upload(&alice(), "p.bin", &data).unwrap();
        let m = h.svc.manifest(&alice(), &r.file_id).unwrap();
        prop_assert_eq!(m.chunk_ids.len(), data.len().div_ceil(chunk_size));
        prop_assert_eq!(h.svc.reconstruct(&m).unwrap(), data);
    }
}
