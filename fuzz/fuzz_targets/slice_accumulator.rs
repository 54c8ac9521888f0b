#![no_main]

use cros_va_pipeline::backend::dummy::DummyDriver;
use cros_va_pipeline::backend::BufferKind;
use cros_va_pipeline::backend::SurfaceId;
use cros_va_pipeline::config::PipelineParams;
use cros_va_pipeline::config::StreamParams;
use cros_va_pipeline::decoder::DecodeSession;
use cros_va_pipeline::Resolution;
use libfuzzer_sys::fuzz_target;

/// `VAProfileMPEG2Main`.
const MPEG2_MAIN: i32 = 1;
/// Size of `VASliceParameterBufferMPEG2`.
const MPEG2_SLICE_PARAM_SIZE: usize = 28;

// The first byte of `data` gives the number of slices. Each slice then takes one control byte
// from the end of `data`: the low 6 bits are the slice length, the high 2 bits the number of bytes
// skipped before it.
fuzz_target!(|data: &[u8]| {
    let Some((&num_slices, rest)) = data.split_first() else {
        return;
    };
    let num_slices = usize::from(num_slices).min(rest.len() / 2);
    let (bitstream, controls) = rest.split_at(rest.len() - num_slices);

    let mut driver = DummyDriver::new();
    let params = PipelineParams::new().with_display(DummyDriver::display());
    let stream = StreamParams::new(MPEG2_MAIN, Resolution::from((64, 64)), MPEG2_SLICE_PARAM_SIZE);

    let mut expected = Vec::new();
    {
        let mut session = DecodeSession::new(&mut driver, &params, &stream).unwrap();
        session.alloc_pic_param(4).unwrap();

        let mut pos = 0;
        for control in controls {
            let start = (pos + usize::from(control >> 6)).min(bitstream.len());
            let end = (start + usize::from(control & 0x3f)).min(bitstream.len());
            session.alloc_slice(&bitstream[start..end]).unwrap();
            expected.extend_from_slice(&bitstream[start..end]);
            pos = end;
        }

        session.finish_frame(SurfaceId(0)).unwrap();
        assert!(session.is_frame_empty());
    }

    assert_eq!(driver.live_buffers(), 0);
    let submitted = driver.submissions()[0].batches[1]
        .iter()
        .filter(|b| b.kind == BufferKind::SliceData)
        .flat_map(|b| b.data.iter().copied())
        .collect::<Vec<_>>();
    assert_eq!(submitted, expected);
});
