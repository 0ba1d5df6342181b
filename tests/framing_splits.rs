// tests/framing_splits.rs
//
// Фрейминг не зависит от того, как поток нарезан на поставки:
// размеры 1, 7, 4103, 10000 и случайные дают ту же последовательность записей,
// что и одна поставка целиком. Плюс фатальные ошибки потока записей:
// обрезанная последняя запись, невыровненный offset, короткий size header.

use anyhow::Result;
use oorandom::Rand64;

use MemSnap::consts::RECORD_SIZE;
use MemSnap::error::Phase;
use MemSnap::stream::VecSource;
use MemSnap::{
    ChunkHeader, ContainerMode, DeclaredSize, MemImage, Session, SessionBuilder, SessionState,
    SnapConfig, SnapError, StreamFramer,
};

fn record(offset: u64, seq: u32, seed: u8) -> Vec<u8> {
    let mut out = ChunkHeader::new(offset, seq).unwrap().to_bytes().to_vec();
    out.extend((0..4096u32).map(|i| seed.wrapping_add(i as u8)));
    out
}

fn records_blob(n: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(n * RECORD_SIZE);
    for i in 0..n {
        out.extend(record((i as u64) * 4096, (i % 3) as u32, i as u8));
    }
    out
}

/// Split `bytes` by `sizes` (cycling) and collect what the framer emits.
fn frame_with(bytes: &[u8], sizes: &[usize]) -> Result<Vec<Vec<u8>>> {
    let mut framer = StreamFramer::new();
    let mut out = Vec::new();
    let mut pos = 0usize;
    let mut i = 0usize;
    while pos < bytes.len() {
        let n = sizes[i % sizes.len()];
        let end = (pos + n).min(bytes.len());
        for r in framer.feed(&bytes[pos..end]) {
            out.push(r.as_bytes().to_vec());
        }
        pos = end;
        i += 1;
    }
    let emitted = framer.finish()?;
    assert_eq!(emitted as usize, out.len());
    Ok(out)
}

fn headerless() -> SnapConfig {
    SessionBuilder::from_default()
        .container(ContainerMode::Absent)
        .build()
}

#[test]
fn fixed_split_sizes_match_single_delivery() -> Result<()> {
    let blob = records_blob(9);
    let whole = frame_with(&blob, &[blob.len()])?;
    assert_eq!(whole.len(), 9);

    for &size in &[1usize, 7, 4103, 4104, 4105, 10_000] {
        let split = frame_with(&blob, &[size])?;
        assert_eq!(split, whole, "split size {}", size);
    }
    Ok(())
}

#[test]
fn random_split_sizes_match_single_delivery() -> Result<()> {
    let blob = records_blob(6);
    let whole = frame_with(&blob, &[blob.len()])?;

    let mut rng = Rand64::new(42);
    for _ in 0..25 {
        let sizes: Vec<usize> = (0..5)
            .map(|_| 1 + rng.rand_range(0..12_000) as usize)
            .collect();
        let split = frame_with(&blob, &sizes)?;
        assert_eq!(split, whole, "sizes {:?}", sizes);
    }
    Ok(())
}

#[test]
fn empty_deliveries_are_harmless() -> Result<()> {
    let blob = records_blob(2);
    let mut framer = StreamFramer::new();
    let mut n = 0;
    n += framer.feed(&[]).count();
    n += framer.feed(&blob[..100]).count();
    n += framer.feed(&[]).count();
    n += framer.feed(&blob[100..]).count();
    assert_eq!(n, 2);
    assert_eq!(framer.pending(), 0);
    assert_eq!(framer.finish()?, 2);
    Ok(())
}

#[test]
fn session_result_is_split_independent() -> Result<()> {
    let mut bytes = DeclaredSize::new(5 * 4096)?.to_bytes().to_vec();
    bytes.extend(records_blob(5));

    let mut reference: Option<Vec<u8>> = None;
    for sizes in [vec![bytes.len()], vec![1], vec![7], vec![4103], vec![10_000], vec![3, 5000, 11]] {
        let mut src = VecSource::with_sizes(&bytes, &sizes);
        let mut img = MemImage::new();
        let out = Session::new(headerless()).run(&mut src, &mut img)?;
        assert!(out.report.passed(), "sizes {:?}: {}", sizes, out.report);
        match &reference {
            None => reference = Some(img.into_bytes()),
            Some(r) => assert_eq!(&img.into_bytes(), r, "sizes {:?}", sizes),
        }
    }
    Ok(())
}

#[test]
fn truncated_final_record_is_reported() -> Result<()> {
    let mut bytes = DeclaredSize::new(8192)?.to_bytes().to_vec();
    bytes.extend(record(0, 0, 1));
    // полный заголовок второй записи, но только 4095 байт данных
    let second = record(4096, 0, 2);
    bytes.extend_from_slice(&second[..second.len() - 1]);

    let mut src = VecSource::chunked(&bytes, 1000);
    let mut img = MemImage::new();
    let mut s = Session::new(headerless());
    let err = s.run(&mut src, &mut img).unwrap_err();

    match err {
        SnapError::Truncated { pending, record } => {
            assert_eq!(pending, RECORD_SIZE - 1);
            assert_eq!(record, RECORD_SIZE);
        }
        other => panic!("expected Truncated, got {:?}", other),
    }
    assert_eq!(s.state(), SessionState::Failed);
    assert_eq!(s.failed_in(), Some(SessionState::StreamingRecords));
    Ok(())
}

#[test]
fn misaligned_offset_halts_processing() -> Result<()> {
    let mut bytes = DeclaredSize::new(3 * 4096)?.to_bytes().to_vec();
    bytes.extend(record(0, 0, 1));
    // chunk header со смещением 4097: младшие 48 бит не кратны 4096
    let bad_word: u64 = 4097;
    bytes.extend_from_slice(&bad_word.to_ne_bytes());
    bytes.extend(std::iter::repeat(0xEE).take(4096));
    bytes.extend(record(2 * 4096, 0, 3));

    let mut src = VecSource::chunked(&bytes, 4096);
    let mut img = MemImage::new();
    let mut s = Session::new(headerless());
    let err = s.run(&mut src, &mut img).unwrap_err();

    assert!(err.is_format());
    assert_eq!(err.phase(), Some(Phase::Records));
    assert!(err.to_string().contains("record #1"), "{}", err);
    assert_eq!(s.failed_in(), Some(SessionState::StreamingRecords));
    // третья запись так и не применена
    assert!(img.as_bytes()[2 * 4096..].iter().all(|&b| b == 0));
    Ok(())
}

#[test]
fn short_size_header_is_format_error() {
    let mut src = VecSource::new(vec![vec![0u8; 5]]);
    let mut img = MemImage::new();
    let mut s = Session::new(headerless());
    let err = s.run(&mut src, &mut img).unwrap_err();
    assert_eq!(err.phase(), Some(Phase::SizeHeader));
    assert_eq!(s.failed_in(), Some(SessionState::ReadingSizeHeader));
}

#[test]
fn unaligned_declared_size_is_format_error() {
    let bytes = 4097u64.to_ne_bytes().to_vec();
    let mut src = VecSource::new(vec![bytes]);
    let mut img = MemImage::new();
    let err = Session::new(headerless()).run(&mut src, &mut img).unwrap_err();
    assert_eq!(err.phase(), Some(Phase::SizeHeader));
}

#[test]
fn session_cannot_be_reused() -> Result<()> {
    let bytes = DeclaredSize::new(0)?.to_bytes().to_vec();
    let mut s = Session::new(headerless());
    s.run(&mut VecSource::new(vec![bytes.clone()]), &mut MemImage::new())?;
    assert!(s
        .run(&mut VecSource::new(vec![bytes]), &mut MemImage::new())
        .is_err());
    Ok(())
}

#[test]
fn early_dropped_iterator_does_not_fake_truncation() -> Result<()> {
    let blob = records_blob(2);
    let mut framer = StreamFramer::new();
    let first = framer.feed(&blob).next().expect("first record");
    assert_eq!(first.as_bytes(), &blob[..RECORD_SIZE]);

    // carry никогда не дорастает до целой записи
    assert!(framer.pending() < RECORD_SIZE);
    assert_eq!(framer.ready(), 1);

    let rest: Vec<_> = framer.drain_ready().collect();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].as_bytes(), &blob[RECORD_SIZE..]);
    assert_eq!(framer.finish()?, 2);
    Ok(())
}
