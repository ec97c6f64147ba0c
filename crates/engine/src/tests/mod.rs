//! Loopback end-to-end tests: two real `Swarm`s, one seeding and one
//! leeching, talking over `127.0.0.1`. No mocks at the wire layer.
//!
//! Grounded on `librqbit::tests::e2e`'s shape (build a torrent, start a
//! seeding peer, start a downloading client against it, check the bytes
//! match) but actually implemented end to end rather than left as a stub.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rbt_core::{generate_peer_id, Id20, TorrentMeta};
use rbt_sha1::sha1_of;

use crate::piece_store::PieceStore;
use crate::swarm::{Swarm, SwarmConfig};

fn torrent_with(total_length: u64, piece_length: u32, piece_hashes: Vec<[u8; 20]>) -> TorrentMeta {
    let mut pieces = Vec::new();
    for h in &piece_hashes {
        pieces.extend_from_slice(h);
    }
    TorrentMeta {
        announce: None,
        announce_list: Vec::new(),
        name: Some("out.bin".into()),
        piece_length,
        pieces,
        total_length,
        info_hash: Id20::new([0x42; 20]),
    }
}

async fn bind_swarm(torrent: Arc<TorrentMeta>, store: Arc<PieceStore>, seed_after_complete: bool) -> Swarm {
    let config = SwarmConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        max_peers: 10,
        seed_after_complete,
        restrict_to: None,
    };
    Swarm::bind(torrent, store, generate_peer_id(), config)
        .await
        .expect("binding a loopback listener never fails in a test")
}

async fn run_restricted_to(addr: SocketAddr, mut swarm: Swarm) -> Result<(), crate::EngineError> {
    swarm.add_peers([addr]);
    swarm.run(None).await
}

/// spec.md §8 scenario 1 ("tiny torrent, loopback"): a single-piece,
/// single-block torrent, one peer already holding it, one peer with
/// nothing. The leecher must finish with a byte-identical file.
#[tokio::test(start_paused = true)]
async fn loopback_tiny_single_piece_torrent() {
    let data = b"HELLO WORLD PIECE A!".to_vec();
    assert_eq!(data.len(), 20);
    let torrent = Arc::new(torrent_with(20, 20, vec![sha1_of(&data)]));

    let seeder_dir = tempfile::tempdir().unwrap();
    let seeder_store = Arc::new(PieceStore::create(&seeder_dir.path().join("seed.bin"), &torrent).unwrap());
    seeder_store.record_block(0, 0, &data).unwrap();
    assert!(seeder_store.is_complete());

    let leecher_dir = tempfile::tempdir().unwrap();
    let leecher_path = leecher_dir.path().join("out.bin");
    let leecher_store = Arc::new(PieceStore::create(&leecher_path, &torrent).unwrap());

    let seeder = bind_swarm(torrent.clone(), seeder_store, true).await;
    let seeder_addr = seeder.local_addr().unwrap();
    tokio::spawn(seeder.run(None));

    let leecher = bind_swarm(torrent, leecher_store.clone(), false).await;
    let outcome = tokio::time::timeout(Duration::from_secs(30), run_restricted_to(seeder_addr, leecher)).await;

    outcome
        .expect("leecher did not finish before the test timeout")
        .expect("leecher's run() returned an error");
    assert!(leecher_store.is_complete());
    assert_eq!(leecher_store.bytes_downloaded(), 20);

    let written = std::fs::read(&leecher_path).unwrap();
    assert_eq!(written, data);
}

/// spec.md §8 scenario 2: a torrent spanning several whole pieces plus a
/// ragged final piece shorter than `piece_length`, downloaded over more
/// than one block per piece.
#[tokio::test(start_paused = true)]
async fn loopback_multi_piece_with_ragged_tail() {
    use rbt_core::BLOCK_LEN;

    let piece_length = BLOCK_LEN * 2; // two blocks per whole piece
    let p0 = vec![0xAAu8; piece_length as usize];
    let p1 = vec![0xBBu8; piece_length as usize];
    let p2 = vec![0xCCu8; BLOCK_LEN as usize + 37]; // ragged tail
    let mut full = Vec::new();
    full.extend_from_slice(&p0);
    full.extend_from_slice(&p1);
    full.extend_from_slice(&p2);

    let torrent = Arc::new(torrent_with(
        full.len() as u64,
        piece_length,
        vec![sha1_of(&p0), sha1_of(&p1), sha1_of(&p2)],
    ));

    let seeder_dir = tempfile::tempdir().unwrap();
    let seeder_store = Arc::new(PieceStore::create(&seeder_dir.path().join("seed.bin"), &torrent).unwrap());
    for (i, piece) in [&p0, &p1, &p2].into_iter().enumerate() {
        for start in (0..piece.len()).step_by(BLOCK_LEN as usize) {
            let end = (start + BLOCK_LEN as usize).min(piece.len());
            seeder_store.record_block(i as u32, start as u32, &piece[start..end]).unwrap();
        }
    }
    assert!(seeder_store.is_complete());

    let leecher_dir = tempfile::tempdir().unwrap();
    let leecher_path = leecher_dir.path().join("out.bin");
    let leecher_store = Arc::new(PieceStore::create(&leecher_path, &torrent).unwrap());

    let seeder = bind_swarm(torrent.clone(), seeder_store, true).await;
    let seeder_addr = seeder.local_addr().unwrap();
    tokio::spawn(seeder.run(None));

    let leecher = bind_swarm(torrent, leecher_store.clone(), false).await;
    let outcome = tokio::time::timeout(Duration::from_secs(30), run_restricted_to(seeder_addr, leecher)).await;

    outcome
        .expect("leecher did not finish before the test timeout")
        .expect("leecher's run() returned an error");
    assert!(leecher_store.is_complete());

    let written = std::fs::read(&leecher_path).unwrap();
    assert_eq!(written, full);
}
