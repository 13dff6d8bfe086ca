#[derive(Clone, Copy, Debug)]
pub struct Resample {
    pub samplerate_in: u32,
    pub samplerate_out: u32,
    pub in_channels: u16,
}

impl Resample {
    /// Converts interleaved input to mono at the output rate.
    pub fn apply(&self, data: &[f32]) -> Vec<f32> {
        let resampled = if self.samplerate_in == self.samplerate_out {
            data.to_vec()
        } else {
            audio_resample(
                data,
                self.samplerate_in,
                self.samplerate_out,
                self.in_channels,
            )
        };
        downmix(&resampled, self.in_channels)
    }
}

pub fn audio_resample(
    data: &[f32],
    sample_rate0: u32,
    sample_rate: u32,
    channels: u16,
) -> Vec<f32> {
    use samplerate::{ConverterType, convert};
    convert(
        sample_rate0 as _,
        sample_rate as _,
        channels as _,
        ConverterType::SincBestQuality,
        data,
    )
    .unwrap_or_default()
}

/// Averages interleaved frames down to one channel.
pub fn downmix(data: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    let n = channels as usize;
    data.chunks(n)
        .map(|frame| frame.iter().sum::<f32>() / n as f32)
        .collect()
}
