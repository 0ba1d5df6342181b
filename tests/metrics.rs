// tests/metrics.rs
//
// Глобальные счётчики: один тест на бинарь, чтобы параллельные тесты не мешали reset().

use anyhow::Result;

use MemSnap::metrics::{metrics_reset, metrics_snapshot};
use MemSnap::stream::VecSource;
use MemSnap::{ChunkHeader, DeclaredSize, MemImage, Session, SessionBuilder};

fn record(offset: u64, seq: u32) -> Vec<u8> {
    let mut out = ChunkHeader::new(offset, seq).unwrap().to_bytes().to_vec();
    out.extend(std::iter::repeat(seq as u8).take(4096));
    out
}

#[test]
fn counters_follow_sessions() -> Result<()> {
    metrics_reset();

    let mut bytes = DeclaredSize::new(2 * 4096)?.to_bytes().to_vec();
    for r in [record(0, 0), record(4096, 0), record(0, 0), record(0, 2), record(4096, 1)] {
        bytes.extend(r);
    }
    let cfg = SessionBuilder::from_default().build();
    let out = Session::new(cfg).run(&mut VecSource::chunked(&bytes, 5000), &mut MemImage::new())?;
    assert!(out.report.passed());

    // второй прогон: страница 1 отсутствует -> fail
    let mut bytes2 = DeclaredSize::new(2 * 4096)?.to_bytes().to_vec();
    bytes2.extend(record(0, 0));
    let cfg = SessionBuilder::from_default().build();
    let out2 = Session::new(cfg).run(&mut VecSource::chunked(&bytes2, 100), &mut MemImage::new())?;
    assert!(!out2.report.passed());

    // третий: обрезанный поток -> aborted
    let cfg = SessionBuilder::from_default().build();
    let short = bytes2[..bytes2.len() - 1].to_vec();
    assert!(Session::new(cfg)
        .run(&mut VecSource::new(vec![short]), &mut MemImage::new())
        .is_err());

    let m = metrics_snapshot();
    assert_eq!(m.records_framed, 6);
    assert_eq!(m.pages_written, 6);
    assert_eq!(m.page_overwrites, 2);
    assert_eq!(m.same_gen_duplicates, 1);
    assert_eq!(m.gen_regressions, 0);
    assert_eq!(m.sessions_passed, 1);
    assert_eq!(m.sessions_failed, 1);
    assert_eq!(m.sessions_aborted, 1);
    assert!(m.deliveries_total >= 3);
    assert!(m.avg_delivery_bytes() > 0.0);

    metrics_reset();
    assert_eq!(metrics_snapshot().records_framed, 0);
    Ok(())
}
