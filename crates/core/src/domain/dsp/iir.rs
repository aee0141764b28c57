//! IIR biquad stage
//!
//! Coefficients come either literally (`direct`) or from the audio-EQ
//! cookbook formulas, evaluated once the sample rate is known. The
//! recursion is transposed direct form II with `f64` state:
//!
//! ```text
//! y  = s1 + b0·x
//! s1 = s2 + b1·x − a1·y
//! s2 =      b2·x − a2·y
//! ```

use super::{Block, Stage, StageKind};
use crate::domain::audio::{Geometry, Result, MAX_CHANNELS};
use crate::domain::config::ConfigError;
use crate::domain::diagnostics::DiagnosticSink;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

/// Biquad response type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterType {
    #[serde(rename = "lp2")]
    LowPass,
    #[serde(rename = "hp2")]
    HighPass,
    #[serde(rename = "ap2")]
    AllPass,
    #[serde(rename = "ls2")]
    LowShelf,
    #[serde(rename = "hs2")]
    HighShelf,
    #[serde(rename = "peq")]
    Peaking,
    #[serde(rename = "direct")]
    Direct,
}

impl FilterType {
    pub const ALL: [FilterType; 7] = [
        FilterType::LowPass,
        FilterType::HighPass,
        FilterType::AllPass,
        FilterType::LowShelf,
        FilterType::HighShelf,
        FilterType::Peaking,
        FilterType::Direct,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FilterType::LowPass => "lp2",
            FilterType::HighPass => "hp2",
            FilterType::AllPass => "ap2",
            FilterType::LowShelf => "ls2",
            FilterType::HighShelf => "hs2",
            FilterType::Peaking => "peq",
            FilterType::Direct => "direct",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Parameters that must be present for this type
    pub fn required_keys(&self) -> &'static [&'static str] {
        match self {
            FilterType::LowPass | FilterType::HighPass | FilterType::AllPass => &["f", "q"],
            FilterType::LowShelf | FilterType::HighShelf | FilterType::Peaking => &["f", "q", "g"],
            FilterType::Direct => &["b0", "b1", "b2", "a1", "a2"],
        }
    }

    /// Parameters that may be present for this type
    pub fn optional_keys(&self) -> &'static [&'static str] {
        match self {
            FilterType::LowPass | FilterType::HighPass | FilterType::AllPass => &["g"],
            _ => &[],
        }
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Normalized biquad coefficients (`a0 = 1`)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        // Unity gain (no filtering)
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }
}

/// Shared intermediate terms of the cookbook formulas
struct Prototype {
    cos_w0: f64,
    alpha: f64,
}

impl Prototype {
    fn new(sample_rate: f64, freq: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * freq / sample_rate;
        Self {
            cos_w0: w0.cos(),
            alpha: w0.sin() / (2.0 * q),
        }
    }
}

impl BiquadCoeffs {
    /// Divide through by `a0`
    fn normalized(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> Self {
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Second-order low-pass
    #[must_use]
    pub fn low_pass(sample_rate: f64, freq: f64, q: f64) -> Self {
        let p = Prototype::new(sample_rate, freq, q);
        let b1 = 1.0 - p.cos_w0;
        Self::normalized(
            b1 / 2.0,
            b1,
            b1 / 2.0,
            1.0 + p.alpha,
            -2.0 * p.cos_w0,
            1.0 - p.alpha,
        )
    }

    /// Second-order high-pass
    #[must_use]
    pub fn high_pass(sample_rate: f64, freq: f64, q: f64) -> Self {
        let p = Prototype::new(sample_rate, freq, q);
        let b1 = -(1.0 + p.cos_w0);
        Self::normalized(
            -b1 / 2.0,
            b1,
            -b1 / 2.0,
            1.0 + p.alpha,
            -2.0 * p.cos_w0,
            1.0 - p.alpha,
        )
    }

    /// Second-order all-pass (unit magnitude, phase turns through `freq`)
    #[must_use]
    pub fn all_pass(sample_rate: f64, freq: f64, q: f64) -> Self {
        let p = Prototype::new(sample_rate, freq, q);
        Self::normalized(
            1.0 - p.alpha,
            -2.0 * p.cos_w0,
            1.0 + p.alpha,
            1.0 + p.alpha,
            -2.0 * p.cos_w0,
            1.0 - p.alpha,
        )
    }

    /// Low shelf: `gain_db` below `freq`, unity above
    #[must_use]
    pub fn low_shelf(sample_rate: f64, freq: f64, gain_db: f64, q: f64) -> Self {
        let a = 10.0_f64.powf(gain_db / 40.0);
        let Prototype { cos_w0, alpha } = Prototype::new(sample_rate, freq, q);
        let sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        Self::normalized(
            a * ((a + 1.0) - (a - 1.0) * cos_w0 + sqrt_a_alpha),
            2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
            a * ((a + 1.0) - (a - 1.0) * cos_w0 - sqrt_a_alpha),
            (a + 1.0) + (a - 1.0) * cos_w0 + sqrt_a_alpha,
            -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
            (a + 1.0) + (a - 1.0) * cos_w0 - sqrt_a_alpha,
        )
    }

    /// High shelf: `gain_db` above `freq`, unity below
    #[must_use]
    pub fn high_shelf(sample_rate: f64, freq: f64, gain_db: f64, q: f64) -> Self {
        let a = 10.0_f64.powf(gain_db / 40.0);
        let Prototype { cos_w0, alpha } = Prototype::new(sample_rate, freq, q);
        let sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        Self::normalized(
            a * ((a + 1.0) + (a - 1.0) * cos_w0 + sqrt_a_alpha),
            -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
            a * ((a + 1.0) + (a - 1.0) * cos_w0 - sqrt_a_alpha),
            (a + 1.0) - (a - 1.0) * cos_w0 + sqrt_a_alpha,
            2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
            (a + 1.0) - (a - 1.0) * cos_w0 - sqrt_a_alpha,
        )
    }

    /// Peaking EQ: `gain_db` at `freq`, bandwidth set by `q`
    #[must_use]
    pub fn peaking(sample_rate: f64, freq: f64, gain_db: f64, q: f64) -> Self {
        let a = 10.0_f64.powf(gain_db / 40.0);
        let p = Prototype::new(sample_rate, freq, q);

        Self::normalized(
            1.0 + p.alpha * a,
            -2.0 * p.cos_w0,
            1.0 - p.alpha * a,
            1.0 + p.alpha / a,
            -2.0 * p.cos_w0,
            1.0 - p.alpha / a,
        )
    }

    /// Scale the numerator by an output gain in dB
    #[must_use]
    pub fn with_gain(self, gain_db: f64) -> Self {
        let g = 10.0_f64.powf(gain_db / 20.0);
        Self {
            b0: self.b0 * g,
            b1: self.b1 * g,
            b2: self.b2 * g,
            ..self
        }
    }

    /// Complex response at `freq` Hz
    pub fn frequency_response(&self, freq: f64, sample_rate: f64) -> Complex64 {
        let w = 2.0 * PI * freq / sample_rate;
        let z1 = Complex64::from_polar(1.0, -w);
        let z2 = z1 * z1;
        let num = self.b0 + z1 * self.b1 + z2 * self.b2;
        let den = 1.0 + z1 * self.a1 + z2 * self.a2;
        num / den
    }

    /// Magnitude response at `freq` Hz, in dB
    pub fn magnitude_db(&self, freq: f64, sample_rate: f64) -> f64 {
        20.0 * self.frequency_response(freq, sample_rate).norm().log10()
    }

    /// Both poles strictly inside the unit circle
    pub fn is_stable(&self) -> bool {
        self.a2.abs() < 1.0 && self.a1.abs() < 1.0 + self.a2
    }
}

/// How an [`IirStage`] obtains its coefficients
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BiquadDesign {
    /// Literal coefficients
    Direct(BiquadCoeffs),
    /// Cookbook design evaluated at the pipeline's sample rate
    Designed {
        filter: FilterType,
        freq: f64,
        q: f64,
        gain_db: f64,
    },
}

impl BiquadDesign {
    pub fn filter_type(&self) -> FilterType {
        match self {
            BiquadDesign::Direct(_) => FilterType::Direct,
            BiquadDesign::Designed { filter, .. } => *filter,
        }
    }

    /// Evaluate the design for a sample rate
    pub fn coefficients(&self, sample_rate: u32) -> std::result::Result<BiquadCoeffs, ConfigError> {
        let (filter, freq, q, gain_db) = match *self {
            BiquadDesign::Direct(coeffs) => return Ok(coeffs),
            BiquadDesign::Designed {
                filter,
                freq,
                q,
                gain_db,
            } => (filter, freq, q, gain_db),
        };

        let fs = sample_rate as f64;
        if !(freq > 0.0 && freq < fs / 2.0) {
            return Err(ConfigError::Invalid(format!(
                "iir: {} frequency {} Hz outside (0, {}) at {} Hz",
                filter,
                freq,
                fs / 2.0,
                sample_rate
            )));
        }
        if !(q > 0.0 && q.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "iir: {} quality factor {} must be positive",
                filter, q
            )));
        }
        if !gain_db.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "iir: {} gain {} dB is not finite",
                filter, gain_db
            )));
        }

        let coeffs = match filter {
            FilterType::LowPass => BiquadCoeffs::low_pass(fs, freq, q).with_gain(gain_db),
            FilterType::HighPass => BiquadCoeffs::high_pass(fs, freq, q).with_gain(gain_db),
            FilterType::AllPass => BiquadCoeffs::all_pass(fs, freq, q).with_gain(gain_db),
            FilterType::LowShelf => BiquadCoeffs::low_shelf(fs, freq, gain_db, q),
            FilterType::HighShelf => BiquadCoeffs::high_shelf(fs, freq, gain_db, q),
            FilterType::Peaking => BiquadCoeffs::peaking(fs, freq, gain_db, q),
            FilterType::Direct => {
                return Err(ConfigError::Invalid(
                    "iir: direct filters take coefficients, not a design".to_string(),
                ))
            }
        };
        Ok(coeffs)
    }
}

/// Per-channel biquad
#[derive(Debug, Clone)]
pub struct IirStage {
    design: BiquadDesign,
    coeffs: BiquadCoeffs,
    // [s1, s2] per channel
    state: [[f64; 2]; MAX_CHANNELS],
}

impl IirStage {
    pub fn new(design: BiquadDesign) -> Self {
        let coeffs = match design {
            BiquadDesign::Direct(coeffs) => coeffs,
            BiquadDesign::Designed { .. } => BiquadCoeffs::default(),
        };
        Self {
            design,
            coeffs,
            state: [[0.0; 2]; MAX_CHANNELS],
        }
    }

    pub fn direct(coeffs: BiquadCoeffs) -> Self {
        Self::new(BiquadDesign::Direct(coeffs))
    }

    pub fn design(&self) -> &BiquadDesign {
        &self.design
    }

    /// Coefficients in use (designed ones are set by `init`)
    pub fn coefficients(&self) -> BiquadCoeffs {
        self.coeffs
    }
}

impl Stage for IirStage {
    fn kind(&self) -> StageKind {
        StageKind::Iir
    }

    fn init(&mut self, geometry: &Geometry, sink: &dyn DiagnosticSink) -> Result<()> {
        self.coeffs = self.design.coefficients(geometry.sample_rate)?;
        let c = &self.coeffs;
        sink.debug(format_args!(
            "iir: {} b0={} b1={} b2={} a1={} a2={}",
            self.design.filter_type(),
            c.b0,
            c.b1,
            c.b2,
            c.a1,
            c.a2
        ));
        if !c.is_stable() {
            sink.warn(format_args!(
                "iir: poles on or outside the unit circle (a1={}, a2={})",
                c.a1, c.a2
            ));
        }
        Ok(())
    }

    fn process(&mut self, block: &mut Block<'_>) {
        let BiquadCoeffs { b0, b1, b2, a1, a2 } = self.coeffs;
        for c in 0..block.channels() {
            let (input, output) = block.io(c);
            let [mut s1, mut s2] = self.state[c];
            for (out, &x) in output.iter_mut().zip(input) {
                let x = x as f64;
                let y = s1 + b0 * x;
                s1 = s2 + b1 * x - a1 * y;
                s2 = b2 * x - a2 * y;
                *out = y as f32;
            }
            self.state[c] = [s1, s2];
        }
    }
}
