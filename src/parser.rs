//! Typed override grammar for interactive prompt lines.
//!
//! One line of operator input is a prompt plus zero or more `--flag value`
//! overrides, e.g. `a red fox --samples 3 --steps 20`. Parsing never touches
//! the live configuration: the overrides come back as data and the caller
//! merges them only after the whole line has validated, so a rejected line
//! has no side effects.

use log::info;
use thiserror::Error;

use crate::config::{self, Sampler, SessionConfig};
use crate::rng::SeedSource;

/// Grid output selection carried by a prompt line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridMode {
    Skip,
    Save,
}

/// Parameter overrides extracted from one line. `None` leaves the
/// corresponding configuration field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub sampler: Option<Sampler>,
    pub grid: Option<GridMode>,
    pub steps: Option<usize>,
    pub samples: Option<usize>,
    pub iter: Option<usize>,
    pub rows: Option<usize>,
    pub scale: Option<f64>,
    pub seed: Option<u64>,
    pub width: Option<usize>,
    pub height: Option<usize>,
}

impl Overrides {
    /// Merge the overrides into `cfg`. A seed override also restarts the
    /// deterministic stream and is announced to the operator.
    pub fn apply(&self, cfg: &mut SessionConfig, seeds: &mut dyn SeedSource) {
        if let Some(s) = self.sampler {
            cfg.sampler = s;
        }
        if let Some(g) = self.grid {
            cfg.skip_grid = g == GridMode::Skip;
        }
        if let Some(v) = self.steps {
            cfg.steps = v;
        }
        if let Some(v) = self.samples {
            cfg.n_samples = v;
        }
        if let Some(v) = self.iter {
            cfg.n_iter = v;
        }
        if let Some(v) = self.rows {
            cfg.n_rows = v;
        }
        if let Some(v) = self.scale {
            cfg.scale = v;
        }
        if let Some(v) = self.width {
            cfg.width = v;
        }
        if let Some(v) = self.height {
            cfg.height = v;
        }
        if let Some(seed) = self.seed {
            cfg.seed = seed;
            seeds.reseed(seed);
            info!("Seed set to: {}", seed);
        }
    }
}

/// A fully validated line: a non-empty prompt plus its overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    pub prompt: String,
    pub overrides: Overrides,
}

/// One diagnostic about a rejected line.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LineIssue {
    #[error("unknown arguments: {0}")]
    Unknown(String),
    #[error("{flag} expects a value")]
    MissingValue { flag: &'static str },
    #[error("{flag} got an invalid value: {value}")]
    BadValue { flag: &'static str, value: String },
    #[error("{flag} must be a multiple of {}", config::BLOCK_SIZE)]
    BadDimension { flag: &'static str },
    #[error("no prompt given")]
    EmptyPrompt,
}

/// All diagnostics for a rejected line; the caller re-prompts.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub issues: Vec<LineIssue>,
}

struct FlagSpec {
    name: &'static str,
    value: Option<&'static str>,
    help: &'static str,
}

/// The override grammar. This table drives both parsing and the usage text.
const FLAG_TABLE: &[FlagSpec] = &[
    FlagSpec {
        name: "--steps",
        value: Some("N"),
        help: "number of sampling steps",
    },
    FlagSpec {
        name: "--samples",
        value: Some("N"),
        help: "how many samples to produce per iteration (batch size)",
    },
    FlagSpec {
        name: "--iter",
        value: Some("N"),
        help: "sample this often (iterations)",
    },
    FlagSpec {
        name: "--rows",
        value: Some("N"),
        help: "images per grid row (0 uses the batch size)",
    },
    FlagSpec {
        name: "--scale",
        value: Some("X"),
        help: "unconditional guidance scale",
    },
    FlagSpec {
        name: "--seed",
        value: Some("N"),
        help: "the seed (for reproducible sampling)",
    },
    FlagSpec {
        name: "--W",
        value: Some("PX"),
        help: "image width, must be a multiple of 64",
    },
    FlagSpec {
        name: "--H",
        value: Some("PX"),
        help: "image height, must be a multiple of 64",
    },
    FlagSpec {
        name: "--plms",
        value: None,
        help: "use plms sampling",
    },
    FlagSpec {
        name: "--ddim",
        value: None,
        help: "use ddim sampling",
    },
    FlagSpec {
        name: "--skip_grid",
        value: None,
        help: "do not save a grid, only individual samples",
    },
    FlagSpec {
        name: "--save_grid",
        value: None,
        help: "save a grid when the batch size is > 1",
    },
];

fn flag_spec(name: &str) -> Option<&'static FlagSpec> {
    FLAG_TABLE.iter().find(|f| f.name == name)
}

/// The re-prompt help text, rendered from the flag table.
pub fn usage() -> String {
    let mut out = String::from("usage: PROMPT [--flag value] ...\n\noptional arguments:\n");
    for spec in FLAG_TABLE {
        let head = match spec.value {
            Some(v) => format!("{} {}", spec.name, v),
            None => spec.name.to_string(),
        };
        out.push_str(&format!("  {:<14} {}\n", head, spec.help));
    }
    out
}

fn set_usize(
    flag: &'static str,
    raw: &str,
    slot: &mut Option<usize>,
    issues: &mut Vec<LineIssue>,
) {
    match raw.parse() {
        Ok(v) => *slot = Some(v),
        Err(_) => issues.push(LineIssue::BadValue {
            flag,
            value: raw.to_string(),
        }),
    }
}

fn set_dimension(
    flag: &'static str,
    raw: &str,
    slot: &mut Option<usize>,
    issues: &mut Vec<LineIssue>,
) {
    match raw.parse::<usize>() {
        Ok(v) if config::valid_dimension(v) => *slot = Some(v),
        Ok(_) => issues.push(LineIssue::BadDimension { flag }),
        Err(_) => issues.push(LineIssue::BadValue {
            flag,
            value: raw.to_string(),
        }),
    }
}

/// Parse one raw line of operator input.
///
/// Tokens beginning with `--` are flags (exact, case-sensitive spelling);
/// everything else is a prompt word. When the two flags of a mutually
/// exclusive pair both appear, the later one wins. All diagnostics are
/// collected, not just the first.
pub fn parse_line(line: &str) -> Result<ParsedLine, Rejection> {
    let mut words: Vec<&str> = Vec::new();
    let mut ov = Overrides::default();
    let mut issues = Vec::new();
    let mut unknown: Vec<&str> = Vec::new();

    let mut tokens = line.split_whitespace();
    while let Some(tok) = tokens.next() {
        if !tok.starts_with("--") {
            words.push(tok);
            continue;
        }
        let spec = match flag_spec(tok) {
            Some(spec) => spec,
            None => {
                unknown.push(tok);
                continue;
            }
        };
        if spec.value.is_none() {
            match spec.name {
                "--plms" => ov.sampler = Some(Sampler::Plms),
                "--ddim" => ov.sampler = Some(Sampler::Ddim),
                "--skip_grid" => ov.grid = Some(GridMode::Skip),
                "--save_grid" => ov.grid = Some(GridMode::Save),
                _ => unreachable!("boolean flag not handled: {}", spec.name),
            }
            continue;
        }
        let raw = match tokens.next() {
            Some(raw) => raw,
            None => {
                issues.push(LineIssue::MissingValue { flag: spec.name });
                continue;
            }
        };
        match spec.name {
            "--steps" => set_usize(spec.name, raw, &mut ov.steps, &mut issues),
            "--samples" => set_usize(spec.name, raw, &mut ov.samples, &mut issues),
            "--iter" => set_usize(spec.name, raw, &mut ov.iter, &mut issues),
            "--rows" => set_usize(spec.name, raw, &mut ov.rows, &mut issues),
            "--W" => set_dimension(spec.name, raw, &mut ov.width, &mut issues),
            "--H" => set_dimension(spec.name, raw, &mut ov.height, &mut issues),
            "--scale" => match raw.parse::<f64>() {
                Ok(v) => ov.scale = Some(v),
                Err(_) => issues.push(LineIssue::BadValue {
                    flag: spec.name,
                    value: raw.to_string(),
                }),
            },
            "--seed" => match raw.parse::<u64>() {
                Ok(v) => ov.seed = Some(v),
                Err(_) => issues.push(LineIssue::BadValue {
                    flag: spec.name,
                    value: raw.to_string(),
                }),
            },
            _ => unreachable!("value flag not handled: {}", spec.name),
        }
    }

    if !unknown.is_empty() {
        issues.push(LineIssue::Unknown(unknown.join(":")));
    }

    let prompt = words.join(" ");
    if prompt.trim().is_empty() {
        issues.push(LineIssue::EmptyPrompt);
    }

    if issues.is_empty() {
        Ok(ParsedLine {
            prompt,
            overrides: ov,
        })
    } else {
        Err(Rejection { issues })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records reseed calls so tests can assert exact seed progression.
    struct Recorder {
        reseeds: Vec<u64>,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                reseeds: Vec::new(),
            }
        }
    }

    impl SeedSource for Recorder {
        fn reseed(&mut self, seed: u64) {
            self.reseeds.push(seed);
        }
        fn draw_seed(&mut self) -> u64 {
            0
        }
        fn normal(&mut self, n: usize) -> Vec<f32> {
            vec![0.0; n]
        }
    }

    #[test]
    fn test_plain_prompt() {
        let parsed = parse_line("a red fox\n").unwrap();
        assert_eq!(parsed.prompt, "a red fox");
        assert_eq!(parsed.overrides, Overrides::default());
    }

    #[test]
    fn test_overrides_leave_unmentioned_fields_alone() {
        let parsed = parse_line("a red fox --samples 3 --steps 20").unwrap();
        assert_eq!(parsed.prompt, "a red fox");

        let mut cfg = SessionConfig::default();
        let mut seeds = Recorder::new();
        parsed.overrides.apply(&mut cfg, &mut seeds);

        assert_eq!(cfg.n_samples, 3);
        assert_eq!(cfg.steps, 20);
        // Everything else is untouched.
        assert_eq!(cfg.scale, 7.5);
        assert_eq!(cfg.width, 512);
        assert_eq!(cfg.height, 512);
        assert_eq!(cfg.n_iter, 1);
        assert_eq!(cfg.seed, 42);
        assert!(seeds.reseeds.is_empty());
    }

    #[test]
    fn test_bad_height_rejected() {
        let err = parse_line("a red fox --H 500").unwrap_err();
        assert_eq!(err.issues, vec![LineIssue::BadDimension { flag: "--H" }]);
    }

    #[test]
    fn test_bad_width_rejected_alongside_valid_overrides() {
        let err = parse_line("a red fox --steps 20 --W 500").unwrap_err();
        assert_eq!(err.issues, vec![LineIssue::BadDimension { flag: "--W" }]);
    }

    #[test]
    fn test_valid_dimensions_accepted() {
        let parsed = parse_line("a red fox --W 768 --H 512").unwrap();
        assert_eq!(parsed.overrides.width, Some(768));
        assert_eq!(parsed.overrides.height, Some(512));
    }

    #[test]
    fn test_unknown_token_rejects_valid_line() {
        let err = parse_line("a red fox --steps 20 --bogus").unwrap_err();
        assert_eq!(
            err.issues,
            vec![LineIssue::Unknown("--bogus".to_string())]
        );

        let err = parse_line("fox --what --ever").unwrap_err();
        assert_eq!(
            err.issues,
            vec![LineIssue::Unknown("--what:--ever".to_string())]
        );
    }

    #[test]
    fn test_empty_prompt_rejected() {
        let err = parse_line("   \n").unwrap_err();
        assert_eq!(err.issues, vec![LineIssue::EmptyPrompt]);

        // Valid overrides alone do not make a line acceptable.
        let err = parse_line("--steps 20").unwrap_err();
        assert_eq!(err.issues, vec![LineIssue::EmptyPrompt]);
    }

    #[test]
    fn test_missing_and_unparseable_values() {
        let err = parse_line("fox --steps").unwrap_err();
        assert_eq!(
            err.issues,
            vec![LineIssue::MissingValue { flag: "--steps" }]
        );

        let err = parse_line("fox --steps many").unwrap_err();
        assert_eq!(
            err.issues,
            vec![LineIssue::BadValue {
                flag: "--steps",
                value: "many".to_string()
            }]
        );
    }

    #[test]
    fn test_later_flag_wins_in_exclusive_pairs() {
        let parsed = parse_line("fox --ddim --plms").unwrap();
        assert_eq!(parsed.overrides.sampler, Some(Sampler::Plms));

        let parsed = parse_line("fox --plms --ddim").unwrap();
        assert_eq!(parsed.overrides.sampler, Some(Sampler::Ddim));

        let parsed = parse_line("fox --skip_grid --save_grid").unwrap();
        assert_eq!(parsed.overrides.grid, Some(GridMode::Save));
    }

    #[test]
    fn test_seed_override_reseeds_on_apply_only() {
        let parsed = parse_line("fox --seed 1234").unwrap();
        assert_eq!(parsed.overrides.seed, Some(1234));

        let mut cfg = SessionConfig::default();
        let mut seeds = Recorder::new();
        parsed.overrides.apply(&mut cfg, &mut seeds);
        assert_eq!(cfg.seed, 1234);
        assert_eq!(seeds.reseeds, vec![1234]);
    }

    #[test]
    fn test_rejected_line_collects_all_issues() {
        let err = parse_line("--H 500 --junk").unwrap_err();
        assert!(err.issues.contains(&LineIssue::BadDimension { flag: "--H" }));
        assert!(err
            .issues
            .contains(&LineIssue::Unknown("--junk".to_string())));
        assert!(err.issues.contains(&LineIssue::EmptyPrompt));
    }

    #[test]
    fn test_grid_mode_applies_to_skip_grid_field() {
        let mut cfg = SessionConfig::default();
        let mut seeds = Recorder::new();

        parse_line("fox --skip_grid")
            .unwrap()
            .overrides
            .apply(&mut cfg, &mut seeds);
        assert!(cfg.skip_grid);

        parse_line("fox --save_grid")
            .unwrap()
            .overrides
            .apply(&mut cfg, &mut seeds);
        assert!(!cfg.skip_grid);
    }

    #[test]
    fn test_usage_lists_every_flag() {
        let text = usage();
        for spec in super::FLAG_TABLE {
            assert!(text.contains(spec.name), "usage misses {}", spec.name);
        }
    }
}
