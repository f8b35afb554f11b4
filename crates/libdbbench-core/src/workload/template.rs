//! Statement templates
//!
//! A template is a statement with `{{ ... }}` actions that are substituted
//! for every iteration:
//!
//! | action                      | value                                   |
//! |-----------------------------|-----------------------------------------|
//! | `{{.Iter}}`                 | 1-based iteration number                |
//! | `{{call .RandInt63}}`       | uniform integer in `[0, 2^63)`          |
//! | `{{call .RandInt63n N}}`    | uniform integer in `[0, N)`, `N > 0`    |
//! | `{{call .RandFloat32}}`     | uniform `f32` in `[0, 1)`               |
//! | `{{call .RandFloat64}}`     | uniform `f64` in `[0, 1)`               |
//! | `{{call .RandExpFloat64}}`  | exponential, rate 1                     |
//! | `{{call .RandNormFloat64}}` | standard normal                         |
//!
//! Templates are parsed once; rendering only walks the parsed segments.

use std::sync::OnceLock;

use rand::Rng;
use rand_distr::{Exp1, StandardNormal};
use regex::Regex;

fn action_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*(.*?)\s*\}\}").unwrap())
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Iter,
    RandInt63,
    RandInt63n(i64),
    RandFloat32,
    RandFloat64,
    RandExpFloat64,
    RandNormFloat64,
}

/// A parsed statement template
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse `source`, rejecting unknown actions and unbalanced braces
    pub fn parse(source: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut last = 0;

        for caps in action_regex().captures_iter(source) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            push_literal(&mut segments, &source[last..whole.start()])?;
            segments.push(parse_action(&caps[1])?);
            last = whole.end();
        }
        push_literal(&mut segments, &source[last..])?;

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether rendering draws random numbers
    pub fn uses_randomness(&self) -> bool {
        self.segments
            .iter()
            .any(|s| !matches!(s, Segment::Literal(_) | Segment::Iter))
    }

    /// Render the statement for `iteration`, drawing random values from `rng`
    pub fn render<R: Rng + ?Sized>(&self, iteration: u64, rng: &mut R) -> String {
        let mut out = String::with_capacity(self.source.len() + 16);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Iter => out.push_str(&iteration.to_string()),
                Segment::RandInt63 => out.push_str(&rng.gen_range(0..=i64::MAX).to_string()),
                Segment::RandInt63n(n) => out.push_str(&rng.gen_range(0..*n).to_string()),
                Segment::RandFloat32 => out.push_str(&rng.gen::<f32>().to_string()),
                Segment::RandFloat64 => out.push_str(&rng.gen::<f64>().to_string()),
                Segment::RandExpFloat64 => {
                    let v: f64 = rng.sample(Exp1);
                    out.push_str(&v.to_string());
                }
                Segment::RandNormFloat64 => {
                    let v: f64 = rng.sample(StandardNormal);
                    out.push_str(&v.to_string());
                }
            }
        }
        out
    }
}

fn push_literal(segments: &mut Vec<Segment>, text: &str) -> Result<(), String> {
    if text.contains("{{") || text.contains("}}") {
        return Err(format!("unbalanced template braces in '{}'", text.trim()));
    }
    if !text.is_empty() {
        segments.push(Segment::Literal(text.to_string()));
    }
    Ok(())
}

fn parse_action(action: &str) -> Result<Segment, String> {
    let tokens: Vec<&str> = action.split_whitespace().collect();
    match tokens.as_slice() {
        [".Iter"] => Ok(Segment::Iter),
        ["call", ".RandInt63"] => Ok(Segment::RandInt63),
        ["call", ".RandInt63n", arg] => {
            let n: i64 = arg
                .parse()
                .map_err(|_| format!("RandInt63n expects an integer argument, got '{}'", arg))?;
            if n <= 0 {
                return Err(format!("RandInt63n argument must be positive, got {}", n));
            }
            Ok(Segment::RandInt63n(n))
        }
        ["call", ".RandInt63n"] => Err("RandInt63n requires an argument".to_string()),
        ["call", ".RandFloat32"] => Ok(Segment::RandFloat32),
        ["call", ".RandFloat64"] => Ok(Segment::RandFloat64),
        ["call", ".RandExpFloat64"] => Ok(Segment::RandExpFloat64),
        ["call", ".RandNormFloat64"] => Ok(Segment::RandNormFloat64),
        _ => Err(format!("unknown template action '{{{{{}}}}}'", action)),
    }
}
