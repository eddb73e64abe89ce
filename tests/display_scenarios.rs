//! End-to-end scenarios through the handle surface, using the raw control protocol the way an
//! external consumer would.

use pretty_assertions::assert_eq;
use vgfb::{ErrorKind, Mode, Registry, RemapNotice, Resolution, VgfbConfig, VgfbError};
use vgfb_protocol::{decode_index, request, FbFixScreenInfo, FbVarScreenInfo, Payload};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn registry() -> Registry {
    init_tracing();
    Registry::new(VgfbConfig::default())
}

fn var(xres: u32, yres: u32, bits_per_pixel: u32) -> FbVarScreenInfo {
    FbVarScreenInfo {
        xres,
        yres,
        bits_per_pixel,
        ..Default::default()
    }
}

fn pan_payload(yoffset: u32) -> Vec<u8> {
    FbVarScreenInfo {
        yoffset,
        ..Default::default()
    }
    .as_bytes()
    .to_vec()
}

#[test]
fn negotiate_then_flip_between_halves() {
    let reg = registry();
    let handle = reg.open_new().unwrap();

    let reply = handle
        .control(request::FBIOPUT_VSCREENINFO, var(800, 600, 32).as_bytes())
        .unwrap();
    let committed = FbVarScreenInfo::read_from(&reply).unwrap();
    assert_eq!(
        (committed.xres, committed.yres, committed.yres_virtual, committed.bits_per_pixel),
        (800, 600, 1200, 32)
    );

    assert_eq!(
        handle.control(request::FBIOPAN_DISPLAY, &pan_payload(600)),
        Ok(Vec::new())
    );
    let current = FbVarScreenInfo::read_from(
        &handle.control(request::FBIOGET_VSCREENINFO, &[]).unwrap(),
    )
    .unwrap();
    assert_eq!(current.yoffset, 600);

    let err = handle
        .control(request::FBIOPAN_DISPLAY, &pan_payload(601))
        .unwrap_err();
    assert_eq!(
        err,
        VgfbError::YOffsetOutOfRange {
            yoffset: 601,
            limit: 600
        }
    );
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(handle.geometry().unwrap().yoffset, 600);
}

#[test]
fn unsupported_depth_leaves_default_mode() {
    let reg = registry();
    let handle = reg.open_new().unwrap();
    let before = handle.display().mode_list().unwrap();

    let err = handle
        .control(request::FBIOPUT_VSCREENINFO, var(640, 480, 16).as_bytes())
        .unwrap_err();
    assert_eq!(err, VgfbError::InvalidBitsPerPixel(16));
    assert_eq!(err.errno(), -22);

    assert_eq!(handle.geometry().unwrap(), Mode::placeholder(60));
    assert_eq!(handle.display().mode_list().unwrap(), before);
}

#[test]
fn resize_under_mapping_swaps_on_unmap_with_one_notice() {
    let reg = registry();
    let handle = reg.open_new().unwrap();
    let notices = handle.remap_notices();
    handle
        .control(request::FBIOPUT_VSCREENINFO, var(640, 480, 32).as_bytes())
        .unwrap();

    let grant = handle.map().unwrap();
    let mapped_len = grant.len();
    grant.memory().fill(0, 4, 0x5a).unwrap();

    handle
        .control(request::FBIOPUT_VSCREENINFO, var(640, 480, 24).as_bytes())
        .unwrap();
    let stats = handle.stats();
    assert!(stats.pending);
    assert_eq!(stats.buffer_len, mapped_len);
    assert!(grant.is_current());
    assert_eq!(grant.memory().read(0, 4).unwrap(), vec![0x5a; 4]);
    assert!(notices.try_recv().is_err());

    handle.unmap(grant).unwrap();
    let fix = FbFixScreenInfo::read_from(
        &handle.control(request::FBIOGET_FSCREENINFO, &[]).unwrap(),
    )
    .unwrap();
    assert_eq!(u64::from(fix.smem_len), 640 * 960 * 3);
    assert_eq!(fix.line_length, 640 * 3);
    assert_eq!(
        notices.try_iter().collect::<Vec<_>>(),
        vec![RemapNotice {
            display: handle.id(),
            buffer_len: 640 * 960 * 3
        }]
    );
}

#[test]
fn negotiation_narrows_the_mode_list() {
    let reg = registry();
    let handle = reg.open_new().unwrap();
    handle
        .control(request::FBIOPUT_VSCREENINFO, var(1024, 768, 32).as_bytes())
        .unwrap();

    let modes = handle.display().mode_list().unwrap();
    assert_eq!(
        modes.resolutions().collect::<Vec<_>>(),
        vec![Resolution::new(1024, 768)]
    );
    assert!(modes.entries()[0].is_placeholder());

    let err = handle
        .control(request::FBIOPUT_VSCREENINFO, var(800, 600, 32).as_bytes())
        .unwrap_err();
    assert_eq!(
        err,
        VgfbError::UnknownResolution {
            xres: 800,
            yres: 600
        }
    );

    // A fresh instance gets the full table again.
    let other = reg.open_new().unwrap();
    assert!(other
        .display()
        .mode_list()
        .unwrap()
        .contains(Resolution::new(800, 600)));
}

#[test]
fn identity_and_unsupported_requests() {
    let reg = registry();
    let first = reg.open_new().unwrap();
    let second = reg.open_new().unwrap();

    let index = second.control(request::VGFBM_GET_FB_MINOR, &[]).unwrap();
    assert_eq!(decode_index(&index), Ok(1));
    assert_eq!(first.control(request::FBIOBLANK, &[]), Ok(Vec::new()));

    for cmd in [
        request::FBIOGETCMAP,
        request::FBIOPUTCMAP,
        request::FBIO_CURSOR,
        request::FBIOGET_CON2FBMAP,
        request::FBIOPUT_CON2FBMAP,
    ] {
        let err = first.control(cmd, &[]).unwrap_err();
        assert!(matches!(err, VgfbError::Unsupported(_)), "{cmd:#x}: {err}");
    }
    assert_eq!(
        first.control(0xdead, &[]),
        Err(VgfbError::UnknownRequest(0xdead))
    );
    assert!(matches!(
        first.control(request::FBIOPAN_DISPLAY, &[0; 4]),
        Err(VgfbError::MalformedPayload(_))
    ));
}

#[test]
fn map_before_negotiation_and_reads_out_of_range() {
    let reg = registry();
    let handle = reg.open_new().unwrap();
    assert_eq!(handle.map().unwrap_err().kind(), ErrorKind::NotFound);

    handle
        .control(request::FBIOPUT_VSCREENINFO, var(640, 480, 24).as_bytes())
        .unwrap();
    let len = 640 * 960 * 3;
    handle.write(len - 2, &[1, 2]).unwrap();
    assert_eq!(handle.read(len - 2, 2).unwrap(), vec![1, 2]);
    assert_eq!(
        handle.read(len - 1, 2).unwrap_err(),
        VgfbError::OutOfBounds {
            offset: len - 1,
            len: 2,
            size: len
        }
    );
}

#[test]
fn closed_ids_are_reused_and_shutdown_revokes() {
    let reg = registry();
    let a = reg.open_new().unwrap();
    let b = reg.open_new().unwrap();
    a.close().unwrap();
    let c = reg.open_new().unwrap();
    assert_eq!((b.id(), c.id()), (1, 0));

    assert_eq!(reg.shutdown(), 2);
    assert_eq!(b.geometry().unwrap_err(), VgfbError::Gone);
    assert_eq!(reg.open_new().unwrap_err().kind(), ErrorKind::Gone);
}
