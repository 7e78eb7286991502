//! Chunking and reassembly without any link in between.

use p2p_link::transfer::chunk_count;
use p2p_link::{
    ChunkEnvelope, Direction, FileTransferSession, LinkError, TransferFile,
    transfer::ChunkOutcome,
};
use rand::Rng;
use rand::seq::SliceRandom;

fn all_chunks(file: &TransferFile, chunk_size: usize) -> Vec<ChunkEnvelope> {
    let mut sender = FileTransferSession::outgoing(file, chunk_size);
    std::iter::from_fn(|| sender.next_chunk()).collect()
}

#[test]
fn test_shuffled_chunks_reassemble_identically() {
    let mut rng = rand::rng();
    let data: Vec<u8> = (0..20_000).map(|_| rng.random()).collect();
    let file = TransferFile::new("random.bin", "application/octet-stream", data.clone());

    let mut chunks = all_chunks(&file, 1024);
    assert_eq!(chunks.len() as u64, chunk_count(20_000, 1024));
    chunks.shuffle(&mut rng);

    let mut receiver = FileTransferSession::incoming();
    let mut completions = 0;
    for chunk in chunks {
        // Every chunk crosses the wire as text.
        let text = chunk.encode().unwrap();
        if let ChunkOutcome::Completed(binary) =
            receiver.add_chunk(ChunkEnvelope::decode(&text).unwrap()).unwrap()
        {
            completions += 1;
            assert_eq!(binary.as_ref(), data.as_slice());
        }
    }

    assert_eq!(completions, 1);
    assert_eq!(receiver.direction(), Direction::Incoming);
    assert_eq!(receiver.binary().unwrap().as_ref(), data.as_slice());
    assert_eq!(receiver.info(), Some(&file.info));
}

#[test]
fn test_wire_record_field_names() {
    let mut file = TransferFile::new("photo.png", "image/png", vec![1u8, 2, 3]);
    file.info.last_modified = Some(1_700_000_000_000);
    let chunk = &all_chunks(&file, 16)[0];

    let json: serde_json::Value = serde_json::from_str(&chunk.encode().unwrap()).unwrap();
    assert_eq!(json["totalChunks"], 1);
    assert_eq!(json["sequenceNumber"], 1);
    assert_eq!(json["chunkByteSize"], 3);
    assert_eq!(json["payload"], "AQID");
    assert_eq!(json["fileInfo"]["name"], "photo.png");
    assert_eq!(json["fileInfo"]["size"], 3);
    assert_eq!(json["fileInfo"]["mimeType"], "image/png");
    assert_eq!(json["fileInfo"]["lastModified"], 1_700_000_000_000u64);
    assert_eq!(json["fileInfo"]["fileId"], file.info.file_id.as_str());
}

#[test]
fn test_data_url_payload_is_accepted() {
    let file = TransferFile::new("a.txt", "text/plain", "hi!");
    let mut chunk = all_chunks(&file, 16).remove(0);
    chunk.payload = Some(format!("data:text/plain;base64,{}", chunk.payload.unwrap()));

    let mut receiver = FileTransferSession::incoming();
    match receiver.add_chunk(chunk).unwrap() {
        ChunkOutcome::Completed(binary) => assert_eq!(binary.as_ref(), b"hi!"),
        ChunkOutcome::Stored => panic!("single chunk should complete the file"),
    }
}

#[test]
fn test_replayed_chunk_is_rejected_and_ignored() {
    let file = TransferFile::new("b.bin", "", vec![7u8; 2500]);
    let chunks = all_chunks(&file, 1000);

    let mut receiver = FileTransferSession::incoming();
    receiver.add_chunk(chunks[1].clone()).unwrap();
    assert!(matches!(
        receiver.add_chunk(chunks[1].clone()),
        Err(LinkError::DuplicateChunk(2))
    ));
    assert_eq!(receiver.processed(), 1);

    receiver.add_chunk(chunks[0].clone()).unwrap();
    assert!(matches!(
        receiver.add_chunk(chunks[2].clone()).unwrap(),
        ChunkOutcome::Completed(_)
    ));
}

#[test]
fn test_chunks_of_two_files_do_not_mix() {
    let first = TransferFile::new("same.txt", "text/plain", vec![1u8; 1500]);
    // Same name and size, different identity.
    let second = TransferFile::new("same.txt", "text/plain", vec![2u8; 1500]);

    let mut receiver = FileTransferSession::incoming();
    receiver.add_chunk(all_chunks(&first, 1000).remove(0)).unwrap();
    let result = receiver.add_chunk(all_chunks(&second, 1000).remove(1));

    assert!(matches!(result, Err(LinkError::FileIdentityMismatch { .. })));
    assert!(!receiver.is_completed());
    assert!(matches!(receiver.binary(), Err(LinkError::FileNotCompleted)));
}
