//! Conversion between interleaved frames and planar pipeline buffers

use qdsp_core::SampleBuffer;

/// Spread `frames` interleaved frames from `src` into the channels of `dst`
#[inline]
pub fn deinterleave(src: &[f32], dst: &mut SampleBuffer, frames: usize) {
    let channels = dst.channels();
    debug_assert!(src.len() >= frames * channels);
    debug_assert!(frames <= dst.stride());

    for c in 0..channels {
        let plane = &mut dst.channel_mut(c)[..frames];
        for (n, sample) in plane.iter_mut().enumerate() {
            *sample = src[n * channels + c];
        }
    }
}

/// Gather `frames` frames from the channels of `src` into interleaved `dst`
#[inline]
pub fn interleave(src: &SampleBuffer, frames: usize, dst: &mut [f32]) {
    let channels = src.channels();
    debug_assert!(dst.len() >= frames * channels);
    debug_assert!(frames <= src.stride());

    for c in 0..channels {
        for (n, &sample) in src.channel(c)[..frames].iter().enumerate() {
            dst[n * channels + c] = sample;
        }
    }
}
