//! Output placement: collision-free filenames, embedded PNG metadata and
//! grid assembly.
//!
//! Samples land in `<outdir>/samples/NNNNN.png`, grids in
//! `<outdir>/grid-NNNN.png`. Both counters start from the directory contents
//! at startup and only ever move forward, so names stay collision-free even
//! when files appear externally between saves.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use image::RgbImage;
use log::debug;

use crate::config::Sampler;

/// Author tag embedded into every output file.
pub const AUTHOR_TAG: &str = "Stable Diffusion Checkpoint v1.4";

/// Descriptive metadata embedded into a written PNG.
#[derive(Debug, Clone)]
pub struct SampleMeta<'a> {
    pub prompt: &'a str,
    pub seed: u64,
    pub steps: usize,
    pub scale: f64,
    pub sampler: Sampler,
    /// 1-based position within the batch and the batch size; only present for
    /// samples out of a batch larger than one.
    pub batch_pos: Option<(usize, usize)>,
}

impl SampleMeta<'_> {
    fn comment(&self) -> String {
        let mut s = format!(
            "seed: {}, steps: {}, scale: {}, sampler: {}",
            self.seed, self.steps, self.scale, self.sampler
        );
        if let Some((i, n)) = self.batch_pos {
            s.push_str(&format!(", batched: {} of {}", i, n));
        }
        s
    }
}

pub struct OutputManager {
    outdir: PathBuf,
    sample_dir: PathBuf,
    next_sample: usize,
    next_grid: usize,
}

impl OutputManager {
    /// Create the output directories and initialize both counters from their
    /// current contents.
    pub fn new(outdir: &Path) -> Result<Self> {
        let outdir = outdir.to_path_buf();
        let sample_dir = outdir.join("samples");
        fs::create_dir_all(&sample_dir)
            .with_context(|| format!("failed to create {}", sample_dir.display()))?;

        let next_sample = count_entries(&sample_dir)?;
        // The samples subdirectory itself is one entry of outdir.
        let next_grid = count_entries(&outdir)?.saturating_sub(1);

        debug!(
            "output counters: sample {} grid {} ({})",
            next_sample,
            next_grid,
            outdir.display()
        );

        Ok(Self {
            outdir,
            sample_dir,
            next_sample,
            next_grid,
        })
    }

    pub fn outdir(&self) -> &Path {
        &self.outdir
    }

    /// Write one sample under the next free 5-digit name; returns the index
    /// used.
    pub fn save_sample(&mut self, img: &RgbImage, meta: &SampleMeta) -> Result<usize> {
        let (path, idx) = claim(&self.sample_dir, &mut self.next_sample, |i| {
            format!("{:05}.png", i)
        });
        write_png(&path, img, meta)?;
        debug!("wrote sample {}", path.display());
        Ok(idx)
    }

    /// Tile all accumulated batches into one composite and write it under the
    /// next free grid name; returns the index used.
    pub fn save_grid(
        &mut self,
        batches: &[Vec<RgbImage>],
        per_row: usize,
        meta: &SampleMeta,
    ) -> Result<usize> {
        let grid = make_grid(batches, per_row)?;
        let (path, idx) = claim(&self.outdir, &mut self.next_grid, |i| {
            format!("grid-{:04}.png", i)
        });
        write_png(&path, &grid, meta)?;
        debug!("wrote grid {}", path.display());
        Ok(idx)
    }
}

/// Advance the counter past every existing file, claim the first free name,
/// and leave the counter one past the claimed index.
fn claim(dir: &Path, counter: &mut usize, name: impl Fn(usize) -> String) -> (PathBuf, usize) {
    while dir.join(name(*counter)).exists() {
        *counter += 1;
    }
    let idx = *counter;
    *counter += 1;
    (dir.join(name(idx)), idx)
}

fn count_entries(dir: &Path) -> Result<usize> {
    let entries = fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?;
    Ok(entries.count())
}

fn write_png(path: &Path, img: &RgbImage, meta: &SampleMeta) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), img.width(), img.height());
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);
    encoder
        .add_text_chunk("Author".to_string(), AUTHOR_TAG.to_string())
        .context("failed to encode Author chunk")?;
    encoder
        .add_text_chunk("Description".to_string(), meta.prompt.to_string())
        .context("failed to encode Description chunk")?;
    encoder
        .add_text_chunk("Comment".to_string(), meta.comment())
        .context("failed to encode Comment chunk")?;

    let mut writer = encoder
        .write_header()
        .with_context(|| format!("failed to write PNG header for {}", path.display()))?;
    writer
        .write_image_data(img.as_raw())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Flatten the batches iteration-major and tile them `per_row` per row,
/// left-to-right then top-to-bottom. The composite is sized exactly to the
/// tiles; nothing is cropped.
pub fn make_grid(batches: &[Vec<RgbImage>], per_row: usize) -> Result<RgbImage> {
    let tiles: Vec<&RgbImage> = batches.iter().flatten().collect();
    ensure!(!tiles.is_empty(), "no images to tile into a grid");

    let (tw, th) = tiles[0].dimensions();
    let per_row = per_row.max(1).min(tiles.len());
    let rows = (tiles.len() + per_row - 1) / per_row;

    let mut grid = RgbImage::new(per_row as u32 * tw, rows as u32 * th);
    for (i, tile) in tiles.iter().enumerate() {
        ensure!(
            tile.dimensions() == (tw, th),
            "grid tile {} is {:?}, expected {:?}",
            i,
            tile.dimensions(),
            (tw, th)
        );
        let x = (i % per_row) as i64 * i64::from(tw);
        let y = (i / per_row) as i64 * i64::from(th);
        image::imageops::replace(&mut grid, *tile, x, y);
    }
    Ok(grid)
}
