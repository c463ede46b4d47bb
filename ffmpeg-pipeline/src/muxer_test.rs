use super::*;

fn output_path(dir: &tempfile::TempDir, name: &str) -> String {
    dir.path().join(name).to_string_lossy().into_owned()
}

#[test]
fn test_write_header_without_streams_writes_nothing() -> anyhow::Result<()> {
    crate::init()?;
    let dir = tempfile::tempdir()?;
    let location = output_path(&dir, "empty.nut");

    let mut muxer = Muxer::new();
    muxer.open(&location, Some("nut"))?;
    let err = muxer.write_header(&HeaderOptions::new()).unwrap_err();
    assert!(matches!(err, Error::Write(_)), "{:?}", err);
    assert!(!muxer.is_header_written());
    muxer.close()?;

    let written = std::fs::metadata(&location).map(|m| m.len()).unwrap_or(0);
    assert_eq!(written, 0);
    Ok(())
}

#[test]
fn test_write_header_rejects_stream_without_parameters() -> anyhow::Result<()> {
    crate::init()?;
    let dir = tempfile::tempdir()?;
    let location = output_path(&dir, "bare.nut");

    let mut muxer = Muxer::new();
    muxer.open(&location, Some("nut"))?;
    let stream = muxer.new_stream()?;
    assert_eq!(stream.index(), 0);
    assert_eq!(muxer.stream_count(), 1);

    let err = muxer.write_header(&HeaderOptions::new()).unwrap_err();
    assert!(matches!(err, Error::Write(_)), "{:?}", err);
    Ok(())
}

#[test]
fn test_writes_out_of_sequence() -> anyhow::Result<()> {
    crate::init()?;
    let dir = tempfile::tempdir()?;
    let location = output_path(&dir, "order.nut");

    let mut muxer = Muxer::new();
    assert!(matches!(
        muxer.write_header(&HeaderOptions::new()),
        Err(Error::NotOpen(_))
    ));
    assert!(matches!(muxer.write_trailer(), Err(Error::NotOpen(_))));

    muxer.open(&location, Some("nut"))?;
    assert!(matches!(
        muxer.open(&location, Some("nut")),
        Err(Error::InvalidState(_))
    ));
    assert!(matches!(muxer.write_trailer(), Err(Error::InvalidState(_))));

    let packet = Packet::from((ffmpeg_next::Packet::copy(&[0u8; 4]), Rational::new(1, 30)));
    assert!(matches!(
        muxer.write_interleaved(packet),
        Err(Error::InvalidState(_))
    ));

    muxer.close()?;
    muxer.close()?;
    Ok(())
}

#[test]
fn test_open_rejects_unknown_format() {
    crate::init().unwrap();
    let mut muxer = Muxer::new();
    let err = muxer
        .open("/tmp/never-written.bin", Some("no-such-container"))
        .unwrap_err();
    assert!(matches!(err, Error::Open { .. }), "{:?}", err);
    assert!(muxer.close().is_ok());
}

#[test]
fn test_open_rejects_unwritable_destination() {
    crate::init().unwrap();
    let mut muxer = Muxer::new();
    let err = muxer
        .open("/nonexistent/dir/out.nut", None)
        .unwrap_err();
    assert!(matches!(err, Error::Open { .. }), "{:?}", err);
}

#[test]
fn test_copy_streams_and_unused_header_options() -> anyhow::Result<()> {
    let fixture = crate::fixtures::write_fixture(true)?;
    let mut demuxer = crate::Demuxer::new();
    demuxer.open(&fixture.location(), None)?;

    let location = fixture.output("copy.nut");
    let mut muxer = Muxer::new();
    muxer.open(&location, None)?;
    let mut handles = Vec::new();
    for stream in demuxer.streams()? {
        handles.push(muxer.add_stream_copy(stream)?);
    }

    let mut options = HeaderOptions::new();
    options.set("not_a_nut_option", 1i64);
    muxer.write_header(&options)?;
    assert!(muxer.is_header_written());
    for handle in &handles {
        assert!(crate::timestamp::is_valid(muxer.stream_time_base(*handle)?));
    }

    let mut written = 0;
    while let Some(packet) = demuxer.read_packet()? {
        muxer.write_packet(packet)?;
        written += 1;
    }
    muxer.write_trailer()?;
    assert_eq!(muxer.packets_written(), written);
    muxer.close()?;

    let counts = crate::fixtures::count_packets(&location)?;
    assert_eq!(counts, vec![90, 90]);
    Ok(())
}
