use skelcap_convert::{depth_mask_frame, load_yuy2, pack_depth_and_mask, yuy2_frame, ColorConverter};
use skelcap_source::{FrameSize, FrameSource, SourceEvent, SyntheticConfig, SyntheticSource};

#[test]
fn cpu_smoke() -> anyhow::Result<()> {
    let color = FrameSize::new(640, 480);
    let depth = FrameSize::new(64, 48);
    let mut src = SyntheticSource::new(SyntheticConfig {
        color,
        depth,
        ticks: Some(1),
        ..Default::default()
    })?;

    let mut yuy2 = yuy2_frame(color);
    let mut packed = depth_mask_frame(depth);
    let mut pack_result = Ok(());
    src.poll(&mut |ev| match ev {
        SourceEvent::Color { data, .. } => {
            load_yuy2(data, &mut yuy2).unwrap();
        }
        SourceEvent::DepthAndMask { depth, mask, .. } => {
            pack_result = pack_depth_and_mask(depth, mask, &mut packed);
        }
        SourceEvent::Skeleton(_) => {}
    })?;
    pack_result?;

    let mut conv = ColorConverter::half(color)?;
    let out = conv.convert(yuy2.view())?;
    assert_eq!(out.shape(), &[240, 320, 3]);
    assert!(packed.iter().any(|&b| b == 0xFF));
    Ok(())
}
