//! Session configuration: the single source of truth for generation
//! parameters, built once at startup and updated by accepted prompt lines.

use std::fmt;

/// Required divisor for image width and height, in pixels. The latent space
/// is downsampled by a factor of 8 and the backbone needs three further
/// halvings, so anything not a multiple of 64 cannot be represented.
pub const BLOCK_SIZE: usize = 64;

/// Channels of the latent representation.
pub const LATENT_CHANNELS: usize = 4;

/// Pixel-space to latent-space downsampling factor.
pub const DOWNSAMPLE_FACTOR: usize = 8;

/// Sampling algorithm variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sampler {
    Plms,
    Ddim,
}

impl fmt::Display for Sampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sampler::Plms => write!(f, "plms"),
            Sampler::Ddim => write!(f, "ddim"),
        }
    }
}

/// True when `v` is usable as an image width or height.
pub fn valid_dimension(v: usize) -> bool {
    v > 0 && v % BLOCK_SIZE == 0
}

/// All generation parameters for the current session. One instance lives for
/// the whole process; the parser merges overrides into it after each accepted
/// line and the sampling loop updates the seed between iterations.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub sampler: Sampler,
    /// Number of denoising steps per generation call.
    pub steps: usize,
    /// Images per generation call (batch size).
    pub n_samples: usize,
    /// Generation calls per accepted prompt.
    pub n_iter: usize,
    /// Images per grid row; 0 means use the batch size.
    pub n_rows: usize,
    /// Unconditional guidance scale. Exactly 1.0 disables classifier-free
    /// guidance (no unconditional conditioning is computed).
    pub scale: f64,
    pub width: usize,
    pub height: usize,
    /// Seed currently feeding the deterministic random stream.
    pub seed: u64,
    pub skip_grid: bool,
    pub skip_save: bool,
    /// Reuse one starting latent across all iterations of a prompt.
    pub fixed_code: bool,
    /// DDIM eta; 0.0 is fully deterministic sampling.
    pub eta: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sampler: Sampler::Plms,
            steps: 50,
            n_samples: 1,
            n_iter: 1,
            n_rows: 2,
            scale: 7.5,
            width: 512,
            height: 512,
            seed: 42,
            skip_grid: false,
            skip_save: false,
            fixed_code: false,
            eta: 0.0,
        }
    }
}

impl SessionConfig {
    /// Latent-space target shape `(channels, height, width)` for one image.
    pub fn latent_shape(&self) -> (usize, usize, usize) {
        (
            LATENT_CHANNELS,
            self.height / DOWNSAMPLE_FACTOR,
            self.width / DOWNSAMPLE_FACTOR,
        )
    }

    /// Effective grid row width.
    pub fn grid_rows(&self) -> usize {
        if self.n_rows > 0 {
            self.n_rows
        } else {
            self.n_samples
        }
    }
}
