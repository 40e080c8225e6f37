//! Turning evaluator output into scores and metals.
//!
//! Extraction order, first success wins:
//! 1. the whole response as a JSON object
//! 2. each fenced code block (```json ... ```)
//! 3. each balanced `{...}` object embedded in free text
//! 4. a `key: value` line scan (`coherence: 8500`, `metals: gold, silver`)
//!
//! Score fields may sit at the top level or under a `scores` object.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::str::FromStr;

use poc_archive::{Metal, Scores, SCORE_MAX};

/// Upper bound on embedded objects tried per response.
const MAX_EMBEDDED_CANDIDATES: usize = 64;

/// Outcome of parsing one evaluator response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum EvaluationResult {
    Success {
        scores: Scores,
        metals: BTreeSet<Metal>,
        rationale: Option<String>,
    },
    ParseFailure {
        raw_text: String,
        reason: String,
    },
}

impl EvaluationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, EvaluationResult::Success { .. })
    }
}

struct Parsed {
    scores: Scores,
    metals: BTreeSet<Metal>,
    rationale: Option<String>,
}

impl From<Parsed> for EvaluationResult {
    fn from(parsed: Parsed) -> Self {
        EvaluationResult::Success {
            scores: parsed.scores,
            metals: parsed.metals,
            rationale: parsed.rationale,
        }
    }
}

/// Parse a raw evaluator response.
pub fn parse_evaluation(raw: &str) -> EvaluationResult {
    let mut first_error: Option<String> = None;
    let mut note = |e: String| {
        if first_error.is_none() {
            first_error = Some(e);
        }
    };

    if let Some(result) = parse_json_document(raw.trim()) {
        match result {
            Ok(parsed) => return parsed.into(),
            Err(e) => note(e),
        }
    }

    for block in fenced_blocks(raw) {
        if let Some(result) = parse_json_document(block) {
            match result {
                Ok(parsed) => return parsed.into(),
                Err(e) => note(e),
            }
        }
    }

    for candidate in embedded_objects(raw) {
        if let Some(result) = parse_json_document(candidate) {
            match result {
                Ok(parsed) => return parsed.into(),
                Err(e) => note(e),
            }
        }
    }

    match scan_lines(raw) {
        Ok(parsed) => parsed.into(),
        Err(e) => {
            note(e);
            EvaluationResult::ParseFailure {
                raw_text: raw.to_string(),
                reason: first_error.unwrap_or_else(|| "no evaluation found".to_string()),
            }
        }
    }
}

/// `None` when `text` is not a JSON object at all.
fn parse_json_document(text: &str) -> Option<Result<Parsed, String>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(from_object(&map)),
        _ => None,
    }
}

fn from_object(map: &Map<String, Value>) -> Result<Parsed, String> {
    let source = match map.get("scores") {
        Some(Value::Object(inner)) => inner,
        _ => map,
    };

    let coherence = score_field(source, "coherence")?;
    let density = score_field(source, "density")?;
    let novelty = score_field(source, "novelty")?;
    let scores = Scores::new(coherence, density, novelty).map_err(|e| e.to_string())?;

    let metals = match map.get("metals").or_else(|| map.get("metal")) {
        Some(Value::Array(items)) => {
            let mut metals = BTreeSet::new();
            for item in items {
                let name = item
                    .as_str()
                    .ok_or_else(|| format!("metal entry is not a string: {item}"))?;
                metals.insert(parse_metal(name)?);
            }
            metals
        }
        Some(Value::String(list)) => parse_metal_list(list)?,
        Some(Value::Null) => BTreeSet::new(),
        Some(other) => return Err(format!("metals has unexpected type: {other}")),
        None => return Err("missing field: metals".to_string()),
    };

    let rationale = map
        .get("rationale")
        .or_else(|| map.get("reasoning"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(Parsed {
        scores,
        metals,
        rationale,
    })
}

fn score_field(map: &Map<String, Value>, name: &str) -> Result<u32, String> {
    let value = match map.get(name) {
        Some(Value::Number(n)) => match n.as_u64() {
            Some(v) => v,
            None => match n.as_f64() {
                Some(f) if f >= 0.0 && f.fract() == 0.0 => f as u64,
                _ => return Err(format!("{name} is not a non-negative integer: {n}")),
            },
        },
        Some(Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| format!("{name} is not an integer: {s:?}"))?,
        Some(other) => return Err(format!("{name} has unexpected type: {other}")),
        None => return Err(format!("missing field: {name}")),
    };
    check_range(name, value)
}

fn check_range(name: &str, value: u64) -> Result<u32, String> {
    if value > SCORE_MAX as u64 {
        return Err(format!("{name} {value} out of range (max {SCORE_MAX})"));
    }
    Ok(value as u32)
}

fn parse_metal(name: &str) -> Result<Metal, String> {
    Metal::from_str(name).map_err(|e| e.to_string())
}

/// `"gold, silver"`, `"gold and copper"`, `"[gold]"`, `"none"`.
fn parse_metal_list(list: &str) -> Result<BTreeSet<Metal>, String> {
    let mut metals = BTreeSet::new();
    for word in list.split(|c: char| c == ',' || c == '/' || c == '&' || c.is_whitespace()) {
        let word = word.trim_matches(|c: char| !c.is_ascii_alphanumeric());
        if word.is_empty() || word.eq_ignore_ascii_case("and") || word.eq_ignore_ascii_case("none") {
            continue;
        }
        metals.insert(parse_metal(word)?);
    }
    Ok(metals)
}

fn fenced_blocks(raw: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = raw;

    while let Some(start) = rest.find("```") {
        let after = &rest[start + 3..];
        // Skip an info string such as `json`
        let body_start = match after.find('\n') {
            Some(nl) if after[..nl].trim().chars().all(|c| c.is_ascii_alphanumeric()) => nl + 1,
            _ => 0,
        };
        let body = &after[body_start..];
        match body.find("```") {
            Some(end) => {
                blocks.push(body[..end].trim());
                rest = &body[end + 3..];
            }
            None => break,
        }
    }

    blocks
}

fn embedded_objects(raw: &str) -> Vec<&str> {
    raw.char_indices()
        .filter(|(_, c)| *c == '{')
        .filter_map(|(start, _)| matching_close(raw, start).map(|end| &raw[start..=end]))
        .take(MAX_EMBEDDED_CANDIDATES)
        .collect()
}

/// Byte index of the brace closing the one at `start`, skipping strings.
fn matching_close(raw: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in raw[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn leading_number(value: &str) -> Option<u64> {
    let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn scan_lines(raw: &str) -> Result<Parsed, String> {
    let mut coherence = None;
    let mut density = None;
    let mut novelty = None;
    let mut metals = None;
    let mut rationale = None;

    for line in raw.lines() {
        let line = line.trim_start_matches(|c: char| c == '-' || c == '*' || c == '#' || c.is_whitespace());
        let Some(split) = line.find(|c| c == ':' || c == '=') else {
            continue;
        };
        let key = line[..split]
            .trim_matches(|c: char| !c.is_ascii_alphanumeric())
            .to_ascii_lowercase();
        let value = line[split + 1..].trim().trim_matches('*').trim();

        match key.as_str() {
            "coherence" => coherence = leading_number(value),
            "density" => density = leading_number(value),
            "novelty" => novelty = leading_number(value),
            "metals" | "metal" => metals = Some(parse_metal_list(value)?),
            "rationale" | "reasoning" => rationale = Some(value.to_string()),
            _ => {}
        }
    }

    let (Some(coherence), Some(density), Some(novelty), Some(metals)) =
        (coherence, density, novelty, metals)
    else {
        return Err("line scan found no complete evaluation".to_string());
    };

    let scores = Scores::new(
        check_range("coherence", coherence)?,
        check_range("density", density)?,
        check_range("novelty", novelty)?,
    )
    .map_err(|e| e.to_string())?;

    Ok(Parsed {
        scores,
        metals,
        rationale,
    })
}
