use cask_log::{Cask, Config};
use test_log::test;

#[test]
fn heavy_writes_rotate_segments() -> cask_log::Result<()> {
    let folder = tempfile::tempdir()?;
    let config = Config::default().segment_size_bytes(64 * 1_024);

    let cask = Cask::open(folder.path(), config.clone())?;

    let value = vec![b'v'; 1_024];
    for i in 0..1_000u32 {
        cask.put(format!("key-{i:04}").as_bytes(), &value)?;
    }

    let stats = cask.stat()?;
    assert!(
        stats.segment_count >= 15,
        "expected >= 15 segments, got {}",
        stats.segment_count
    );
    assert_eq!(1_000, stats.key_count);

    for i in 0..1_000u32 {
        assert_eq!(1_024, cask.get(format!("key-{i:04}").as_bytes())?.len());
    }

    cask.close()?;
    drop(cask);

    // everything must survive the restart scan across all segments
    let cask = Cask::open(folder.path(), config)?;
    assert_eq!(1_000, cask.stat()?.key_count);
    for i in (0..1_000u32).step_by(97) {
        assert_eq!(1_024, cask.get(format!("key-{i:04}").as_bytes())?.len());
    }

    Ok(())
}

#[test]
fn rotation_keeps_oversized_records_readable() -> cask_log::Result<()> {
    let folder = tempfile::tempdir()?;
    // records bigger than the segment threshold still land somewhere
    let cask = Cask::open(folder.path(), Config::default().segment_size_bytes(256))?;

    cask.put(b"big", &vec![b'x'; 4_096])?;
    cask.put(b"small", b"y")?;

    assert_eq!(4_096, cask.get(b"big")?.len());
    assert_eq!(&*cask.get(b"small")?, b"y");

    Ok(())
}
