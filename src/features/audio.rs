use std::collections::VecDeque;

use super::AudioFeatures;

/// Number of symbols in an audio fingerprint
pub const FINGERPRINT_LENGTH: usize = 32;

/// One symbol per quantization level, 32 levels
const FINGERPRINT_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHIJKLMNOPQRSTUV";

/// Mean bin magnitude under which the spectrum counts as silence
pub const SILENCE_THRESHOLD: f64 = 10.0;

/// Low-band energy must exceed the rolling average by this factor to be a beat
pub const BEAT_RATIO: f64 = 1.3;

/// Rolling low-band energy samples kept for beat detection
pub const ENERGY_HISTORY_LEN: usize = 120;

/// Plausible inter-beat interval range in milliseconds (30-300 BPM)
pub const MIN_BEAT_INTERVAL_MS: f64 = 200.0;
pub const MAX_BEAT_INTERVAL_MS: f64 = 2000.0;

/// Fraction of the spectrum treated as the low-frequency band
const LOW_BAND_FRACTION: usize = 8;

/// Audio feature extractor with a small rolling buffer for tempo estimation
#[derive(Debug, Clone, Default)]
pub struct AudioFeatureExtractor {
    energy_history: VecDeque<f64>,
    last_beat_ms: Option<f64>,
    tempo_bpm: f64,
}

impl AudioFeatureExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract audio features from a frequency-magnitude spectrum.
    ///
    /// `position_ms` is the playback position used to time beats. Returns
    /// `None` for an empty spectrum.
    pub fn extract(&mut self, spectrum: &[u8], position_ms: f64) -> Option<AudioFeatures> {
        if spectrum.is_empty() {
            return None;
        }

        let energy = rms(spectrum);
        let spectral_centroid = spectral_centroid(spectrum);
        let mean = spectrum.iter().map(|&b| b as f64).sum::<f64>() / spectrum.len() as f64;

        let low_band_len = (spectrum.len() / LOW_BAND_FRACTION).max(1);
        let tempo_bpm = self.track_tempo(rms(&spectrum[..low_band_len]), position_ms);

        Some(AudioFeatures {
            energy,
            spectral_centroid,
            tempo_bpm,
            is_silent: mean < SILENCE_THRESHOLD,
            fingerprint: fingerprint(spectrum),
        })
    }

    /// Forget beat history, e.g. when switching media elements
    pub fn reset(&mut self) {
        self.energy_history.clear();
        self.last_beat_ms = None;
        self.tempo_bpm = 0.0;
    }

    pub fn history_len(&self) -> usize {
        self.energy_history.len()
    }

    fn track_tempo(&mut self, low_energy: f64, position_ms: f64) -> f64 {
        let average = if self.energy_history.is_empty() {
            None
        } else {
            Some(self.energy_history.iter().sum::<f64>() / self.energy_history.len() as f64)
        };

        self.energy_history.push_back(low_energy);
        while self.energy_history.len() > ENERGY_HISTORY_LEN {
            self.energy_history.pop_front();
        }

        let is_beat = matches!(average, Some(avg) if avg > 0.0 && low_energy > avg * BEAT_RATIO);
        if is_beat {
            if let Some(last) = self.last_beat_ms {
                let interval = position_ms - last;
                self.tempo_bpm = if (MIN_BEAT_INTERVAL_MS..=MAX_BEAT_INTERVAL_MS).contains(&interval) {
                    60_000.0 / interval
                } else {
                    0.0
                };
            }
            self.last_beat_ms = Some(position_ms);
        }

        self.tempo_bpm
    }
}

/// Root-mean-square of bin magnitudes
pub fn rms(bins: &[u8]) -> f64 {
    if bins.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = bins.iter().map(|&b| (b as f64) * (b as f64)).sum();
    (sum_sq / bins.len() as f64).sqrt()
}

/// Magnitude-weighted mean bin index, 0 for an all-zero spectrum
pub fn spectral_centroid(bins: &[u8]) -> f64 {
    let total: f64 = bins.iter().map(|&b| b as f64).sum();
    if total == 0.0 {
        return 0.0;
    }
    let weighted: f64 = bins
        .iter()
        .enumerate()
        .map(|(i, &b)| i as f64 * b as f64)
        .sum();
    weighted / total
}

/// Quantize the spectrum into a fixed 32-symbol digest.
///
/// The bins are split into 32 equal chunks; each chunk's mean magnitude maps
/// to one of 32 levels. Used for exact-match lookup only.
pub fn fingerprint(bins: &[u8]) -> String {
    let len = bins.len();
    (0..FINGERPRINT_LENGTH)
        .map(|i| {
            let start = i * len / FINGERPRINT_LENGTH;
            let end = (i + 1) * len / FINGERPRINT_LENGTH;
            let chunk = &bins[start..end];
            let avg = if chunk.is_empty() {
                0.0
            } else {
                chunk.iter().map(|&b| b as f64).sum::<f64>() / chunk.len() as f64
            };
            let level = ((avg / 256.0) * FINGERPRINT_ALPHABET.len() as f64) as usize;
            FINGERPRINT_ALPHABET[level.min(FINGERPRINT_ALPHABET.len() - 1)] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_and_centroid() {
        let bins = [0u8, 0, 0, 200];
        assert!((rms(&bins) - 100.0).abs() < 1e-9);
        assert_eq!(spectral_centroid(&bins), 3.0);
        assert_eq!(spectral_centroid(&[0u8; 16]), 0.0);
    }

    #[test]
    fn test_silence_flag() {
        let mut extractor = AudioFeatureExtractor::new();
        let quiet = extractor.extract(&[5u8; 256], 1000.0).unwrap();
        assert!(quiet.is_silent);

        let loud = extractor.extract(&[120u8; 256], 2000.0).unwrap();
        assert!(!loud.is_silent);
    }

    #[test]
    fn test_empty_spectrum_is_absent() {
        let mut extractor = AudioFeatureExtractor::new();
        assert!(extractor.extract(&[], 1000.0).is_none());
    }

    #[test]
    fn test_fingerprint_shape() {
        let bins: Vec<u8> = (0..=255u8).collect();
        let fp = fingerprint(&bins);
        assert_eq!(fp.len(), FINGERPRINT_LENGTH);
        assert!(fp.starts_with('0'));
        assert!(fp.ends_with('V'));

        // Short spectra still produce a full-length digest
        assert_eq!(fingerprint(&[255u8; 5]).len(), FINGERPRINT_LENGTH);
        assert_eq!(fingerprint(&[]), "0".repeat(FINGERPRINT_LENGTH));
    }

    #[test]
    fn test_tempo_from_regular_beats() {
        let mut extractor = AudioFeatureExtractor::new();
        let quiet = vec![10u8; 64];
        let mut beat = vec![10u8; 64];
        beat[..8].fill(200);

        let mut t = 0.0;
        let mut tempo = 0.0;
        for i in 0..12 {
            let spectrum = if i % 4 == 3 { &beat } else { &quiet };
            tempo = extractor.extract(spectrum, t).unwrap().tempo_bpm;
            t += 250.0;
        }
        // Beats every 1000ms
        assert!((tempo - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_tempo_rejects_implausible_interval() {
        let mut extractor = AudioFeatureExtractor::new();
        let quiet = vec![10u8; 64];
        let mut beat = vec![10u8; 64];
        beat[..8].fill(200);

        extractor.extract(&quiet, 0.0);
        extractor.extract(&beat, 100.0);
        extractor.extract(&quiet, 5000.0);
        let features = extractor.extract(&beat, 10_000.0).unwrap();
        assert_eq!(features.tempo_bpm, 0.0);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut extractor = AudioFeatureExtractor::new();
        for i in 0..300 {
            extractor.extract(&[50u8; 32], i as f64 * 10.0);
        }
        assert_eq!(extractor.history_len(), ENERGY_HISTORY_LEN);
        extractor.reset();
        assert_eq!(extractor.history_len(), 0);
    }
}
