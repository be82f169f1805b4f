//! Acoustic features of one audio segment.
//!
//! The segment is peak-normalised and cut into overlapping frames. Per
//! frame we measure RMS energy, log energy, zero-crossing rate and an
//! autocorrelation pitch estimate; the segment's features are the mean and
//! spread of those measurements.

/// Samples per analysis frame (64 ms at 8 kHz).
pub const FRAME_LEN: usize = 512;
/// Step between frame starts.
pub const HOP_LEN: usize = 256;

const MIN_F0_HZ: f64 = 50.0;
const MAX_F0_HZ: f64 = 400.0;
/// Normalised autocorrelation a frame needs to count as voiced.
const VOICING_THRESHOLD: f64 = 0.3;

pub const FEATURE_COUNT: usize = 9;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Features {
    pub rms_mean: f64,
    pub rms_std: f64,
    pub log_energy_mean: f64,
    pub log_energy_std: f64,
    pub zcr_mean: f64,
    pub zcr_std: f64,
    pub f0_mean: f64,
    pub f0_std: f64,
    pub f0_range: f64,
}

impl Features {
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.rms_mean,
            self.rms_std,
            self.log_energy_mean,
            self.log_energy_std,
            self.zcr_mean,
            self.zcr_std,
            self.f0_mean,
            self.f0_std,
            self.f0_range,
        ]
    }
}

/// Extracts features from a segment. Empty or silent audio yields zeros.
pub fn extract(samples: &[f32], sample_rate: u32) -> Features {
    let peak = samples.iter().fold(0.0f64, |acc, &s| acc.max(f64::from(s).abs()));
    if samples.is_empty() || peak == 0.0 {
        return Features::default();
    }

    let normalised: Vec<f64> = samples
        .iter()
        .map(|&s| f64::from(s) / (peak + 1e-8))
        .collect();

    let mut rms = Vec::new();
    let mut log_energy = Vec::new();
    let mut zcr = Vec::new();
    let mut f0 = Vec::new();
    for frame in frames(&normalised) {
        let frame_rms = (frame.iter().map(|s| s * s).sum::<f64>() / frame.len() as f64).sqrt();
        rms.push(frame_rms);
        log_energy.push((frame_rms + 1e-8).ln());
        zcr.push(zero_crossing_rate(frame));
        if let Some(pitch) = estimate_f0(frame, sample_rate) {
            f0.push(pitch);
        }
    }

    let (rms_mean, rms_std) = mean_std(&rms);
    let (log_energy_mean, log_energy_std) = mean_std(&log_energy);
    let (zcr_mean, zcr_std) = mean_std(&zcr);
    let (f0_mean, f0_std) = mean_std(&f0);
    let f0_range = match (
        f0.iter().copied().reduce(f64::max),
        f0.iter().copied().reduce(f64::min),
    ) {
        (Some(max), Some(min)) => max - min,
        _ => 0.0,
    };

    Features {
        rms_mean,
        rms_std,
        log_energy_mean,
        log_energy_std,
        zcr_mean,
        zcr_std,
        f0_mean,
        f0_std,
        f0_range,
    }
}

fn frames(samples: &[f64]) -> Vec<&[f64]> {
    if samples.len() <= FRAME_LEN {
        return vec![samples];
    }
    (0..=samples.len() - FRAME_LEN)
        .step_by(HOP_LEN)
        .map(|start| &samples[start..start + FRAME_LEN])
        .collect()
}

fn zero_crossing_rate(frame: &[f64]) -> f64 {
    if frame.len() < 2 {
        return 0.0;
    }
    let crossings = frame
        .windows(2)
        .filter(|pair| (pair[0] >= 0.0) != (pair[1] >= 0.0))
        .count();
    crossings as f64 / (frame.len() - 1) as f64
}

/// Pitch of a frame by autocorrelation, or `None` when unvoiced.
pub fn estimate_f0(frame: &[f64], sample_rate: u32) -> Option<f64> {
    let rate = f64::from(sample_rate);
    let min_lag = (rate / MAX_F0_HZ).floor() as usize;
    let max_lag = ((rate / MIN_F0_HZ).ceil() as usize).min(frame.len().saturating_sub(1));
    if min_lag == 0 || min_lag > max_lag {
        return None;
    }

    let energy: f64 = frame.iter().map(|s| s * s).sum();
    if energy < 1e-6 {
        return None;
    }

    let (best_lag, best_corr) = (min_lag..=max_lag)
        .map(|lag| {
            let corr: f64 = frame[..frame.len() - lag]
                .iter()
                .zip(&frame[lag..])
                .map(|(a, b)| a * b)
                .sum();
            (lag, corr / energy)
        })
        .fold((0, f64::MIN), |best, candidate| {
            if candidate.1 > best.1 {
                candidate
            } else {
                best
            }
        });

    (best_corr >= VOICING_THRESHOLD).then(|| rate / best_lag as f64)
}

/// Population mean and standard deviation; zeros for an empty slice.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}
