//! External diffusion backend interface.
//!
//! The session loop only ever talks to a [`DiffusionBackend`]: conditioning,
//! the blocking sampling call, and latent decoding. Real model loading and
//! inference plug in behind this trait; [`ProceduralBackend`] is a
//! deterministic, weight-free stand-in that keeps the binary runnable and the
//! orchestration testable.

use anyhow::{ensure, Result};
use image::{ImageBuffer, Rgb, RgbImage};

use crate::config::{Sampler, DOWNSAMPLE_FACTOR};
use crate::rng::SeedSource;

/// Per-prompt conditioning rows produced by a backend. Row width is
/// backend-defined; the session treats it as opaque.
#[derive(Debug, Clone, PartialEq)]
pub struct Conditioning {
    pub rows: Vec<Vec<f32>>,
}

impl Conditioning {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A batch of latent tensors in `(batch, channels, height, width)` layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Latents {
    pub data: Vec<f32>,
    pub shape: (usize, usize, usize, usize),
}

impl Latents {
    pub fn batch_size(&self) -> usize {
        self.shape.0
    }
}

/// Everything one blocking generation call needs.
pub struct SampleRequest<'a> {
    pub sampler: Sampler,
    pub steps: usize,
    pub batch_size: usize,
    /// Latent-space target shape `(channels, height, width)` per image.
    pub shape: (usize, usize, usize),
    pub guidance_scale: f64,
    pub conditioning: &'a Conditioning,
    /// Empty-prompt conditioning; `None` when guidance is disabled.
    pub unconditional: Option<&'a Conditioning>,
    pub eta: f64,
    /// Fixed starting latents reused across iterations, when requested.
    pub start_code: Option<&'a Latents>,
}

/// The external generation procedure. Failures are fatal to the session and
/// are never caught by the caller.
pub trait DiffusionBackend {
    /// Compute conditioning for a batch of prompts.
    fn conditioning(&self, prompts: &[String]) -> Result<Conditioning>;

    /// Run the iterative sampling procedure. Blocking; the sole suspension
    /// point of a session apart from operator input.
    fn sample(&self, req: &SampleRequest, rng: &mut dyn SeedSource) -> Result<Latents>;

    /// Decode latents to pixel space, clipped to the valid range.
    fn decode(&self, latents: &Latents) -> Result<Vec<RgbImage>>;
}

const EMBED_DIM: usize = 8;

/// Deterministic stand-in backend. Prompts hash to a small embedding, latents
/// drift toward it under classifier-free-guidance-style mixing, and decoding
/// upsamples with a fixed channel-to-RGB map. Same prompt, seed and
/// parameters always reproduce the same images.
pub struct ProceduralBackend;

fn embed(prompt: &str) -> Vec<f32> {
    // FNV-1a over the prompt bytes, fanned out into [-1, 1] per dimension.
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in prompt.bytes() {
        h ^= u64::from(b);
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    (0..EMBED_DIM)
        .map(|i| {
            let v = (h.rotate_left(i as u32 * 8) & 0xffff) as f32;
            v / 32767.5 - 1.0
        })
        .collect()
}

impl DiffusionBackend for ProceduralBackend {
    fn conditioning(&self, prompts: &[String]) -> Result<Conditioning> {
        Ok(Conditioning {
            rows: prompts.iter().map(|p| embed(p)).collect(),
        })
    }

    fn sample(&self, req: &SampleRequest, rng: &mut dyn SeedSource) -> Result<Latents> {
        let (c, h, w) = req.shape;
        let per_image = c * h * w;
        let total = req.batch_size * per_image;

        ensure!(
            req.conditioning.len() == req.batch_size,
            "conditioning batch {} does not match requested batch {}",
            req.conditioning.len(),
            req.batch_size
        );
        if let Some(uc) = req.unconditional {
            ensure!(
                uc.len() == req.batch_size,
                "unconditional batch {} does not match requested batch {}",
                uc.len(),
                req.batch_size
            );
        }

        let mut data = match req.start_code {
            Some(code) => {
                ensure!(
                    code.shape == (req.batch_size, c, h, w),
                    "start code shape {:?} does not match request",
                    code.shape
                );
                code.data.clone()
            }
            None => rng.normal(total),
        };

        // PLMS takes larger effective steps than DDIM toward the guided
        // target eps_uc + scale * (eps_c - eps_uc).
        let rate = match req.sampler {
            Sampler::Plms => 0.5,
            Sampler::Ddim => 0.3,
        };
        let steps = req.steps.max(1);
        for _ in 0..steps {
            for (i, x) in data.iter_mut().enumerate() {
                let b = i / per_image;
                let ch = (i % per_image) / (h * w);
                let cond = req.conditioning.rows[b][ch % EMBED_DIM];
                let target = match req.unconditional {
                    Some(uc) => {
                        let u = uc.rows[b][ch % EMBED_DIM];
                        u + req.guidance_scale as f32 * (cond - u)
                    }
                    None => cond,
                };
                *x += (target.clamp(-1.0, 1.0) - *x) * rate / steps as f32;
            }
            if req.eta > 0.0 {
                let jitter = rng.normal(total);
                for (x, j) in data.iter_mut().zip(jitter) {
                    *x += req.eta as f32 * j / steps as f32;
                }
            }
        }

        Ok(Latents {
            data,
            shape: (req.batch_size, c, h, w),
        })
    }

    fn decode(&self, latents: &Latents) -> Result<Vec<RgbImage>> {
        let (batch, c, h, w) = latents.shape;
        ensure!(c >= 3, "decode needs at least 3 latent channels, got {}", c);
        ensure!(
            latents.data.len() == batch * c * h * w,
            "latent buffer length {} does not match shape {:?}",
            latents.data.len(),
            latents.shape
        );

        let f = DOWNSAMPLE_FACTOR as u32;
        let per_image = c * h * w;
        let plane = h * w;

        let mut images = Vec::with_capacity(batch);
        for b in 0..batch {
            let base = b * per_image;
            let img: RgbImage = ImageBuffer::from_fn(w as u32 * f, h as u32 * f, |x, y| {
                let lx = (x / f) as usize;
                let ly = (y / f) as usize;
                let at = |ch: usize| latents.data[base + ch * plane + ly * w + lx];
                let extra = if c > 3 { at(3) } else { 0.0 };
                let to_u8 = |v: f32| ((v.clamp(-1.0, 1.0) + 1.0) * 127.5) as u8;
                Rgb([
                    to_u8(0.7 * at(0) + 0.3 * extra),
                    to_u8(0.7 * at(1) + 0.3 * extra),
                    to_u8(0.7 * at(2) + 0.3 * extra),
                ])
            });
            images.push(img);
        }
        Ok(images)
    }
}
