//! Interactive session loop and per-prompt sampling orchestration.
//!
//! Strictly sequential: read a line, validate it, run the blocking
//! generation calls, persist the results, loop. End of input is the
//! terminal state.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use image::RgbImage;
use log::info;

use crate::backend::{DiffusionBackend, Latents, SampleRequest};
use crate::config::SessionConfig;
use crate::output::{OutputManager, SampleMeta};
use crate::parser::{self, parse_line};
use crate::rng::SeedSource;

pub struct Session<B, S> {
    pub config: SessionConfig,
    backend: B,
    output: OutputManager,
    seeds: S,
}

impl<B: DiffusionBackend, S: SeedSource> Session<B, S> {
    pub fn new(config: SessionConfig, backend: B, output: OutputManager, seeds: S) -> Self {
        Self {
            config,
            backend,
            output,
            seeds,
        }
    }

    /// Run the interactive loop until the input reader is exhausted.
    ///
    /// Rejected lines print their diagnostics plus the usage text and
    /// re-prompt; accepted lines update the configuration and run one
    /// sampling session. Backend and filesystem failures propagate.
    pub fn run<R: BufRead, W: Write>(&mut self, input: &mut R, out: &mut W) -> Result<()> {
        loop {
            write!(out, "\n\nprompt:")?;
            out.flush()?;

            let mut line = String::new();
            let read = input
                .read_line(&mut line)
                .context("failed to read operator input")?;
            if read == 0 {
                info!("end of input, leaving session loop");
                return Ok(());
            }

            match parse_line(&line) {
                Ok(parsed) => {
                    parsed.overrides.apply(&mut self.config, &mut self.seeds);
                    writeln!(out)?;
                    self.run_session(&parsed.prompt)?;
                }
                Err(rejection) => {
                    for issue in &rejection.issues {
                        writeln!(out, "{}", issue)?;
                    }
                    write!(out, "{}", parser::usage())?;
                }
            }
        }
    }

    /// Run `n_iter` generation calls for one accepted prompt and persist the
    /// results. The seed evolves after every iteration, so iterations are
    /// never identical even though they share the prompt.
    pub fn run_session(&mut self, prompt: &str) -> Result<()> {
        let batch = self.config.n_samples;
        let shape = self.config.latent_shape();

        let start_code = if self.config.fixed_code {
            let (c, h, w) = shape;
            Some(Latents {
                data: self.seeds.normal(batch * c * h * w),
                shape: (batch, c, h, w),
            })
        } else {
            None
        };

        let collect_grid = !self.config.skip_grid && batch > 1;
        let mut all_batches: Vec<Vec<RgbImage>> = Vec::new();

        for iter in 0..self.config.n_iter {
            info!("sampling iteration {}/{}", iter + 1, self.config.n_iter);

            let unconditional = if self.config.scale != 1.0 {
                Some(self.backend.conditioning(&vec![String::new(); batch])?)
            } else {
                None
            };
            let conditioning = self.backend.conditioning(&vec![prompt.to_string(); batch])?;

            let request = SampleRequest {
                sampler: self.config.sampler,
                steps: self.config.steps,
                batch_size: batch,
                shape,
                guidance_scale: self.config.scale,
                conditioning: &conditioning,
                unconditional: unconditional.as_ref(),
                eta: self.config.eta,
                start_code: start_code.as_ref(),
            };
            let latents = self.backend.sample(&request, &mut self.seeds)?;
            let images = self.backend.decode(&latents)?;

            if !self.config.skip_save {
                for (i, img) in images.iter().enumerate() {
                    let meta = SampleMeta {
                        prompt,
                        seed: self.config.seed,
                        steps: self.config.steps,
                        scale: self.config.scale,
                        sampler: self.config.sampler,
                        batch_pos: (images.len() > 1).then(|| (i + 1, images.len())),
                    };
                    self.output.save_sample(img, &meta)?;
                }
            }
            if collect_grid {
                all_batches.push(images);
            }

            // Consume a fresh seed only after the generation call has fully
            // used the previous stream state.
            let next = self.seeds.draw_seed();
            self.seeds.reseed(next);
            self.config.seed = next;
            info!("Seed set to: {}", next);
        }

        if collect_grid && !all_batches.is_empty() {
            let meta = SampleMeta {
                prompt,
                seed: self.config.seed,
                steps: self.config.steps,
                scale: self.config.scale,
                sampler: self.config.sampler,
                batch_pos: None,
            };
            let idx = self.output.save_grid(&all_batches, self.config.grid_rows(), &meta)?;
            info!(
                "wrote grid-{:04}.png to {}",
                idx,
                self.output.outdir().display()
            );
        }
        Ok(())
    }
}
