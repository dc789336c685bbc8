//! Quality Validator: deterministic gates A-E applied to the final
//! artefact, folded into a scored `QualityScore`.
//!
//! Each gate is a small pure function returning a `GateOutcome`; `validate`
//! composes them. Keeping gates pure and synchronous makes them cheap to
//! unit test exhaustively without spinning up a scheduler.

use crate::model::{ContextPack, QualityScore};

/// Output of one gate: whether it passed, the specific violations it found
/// (empty on pass), and how much it nudges each of the four dimension
/// scores.
#[derive(Debug, Clone, Default)]
struct GateOutcome {
    passed: bool,
    violations: Vec<String>,
    substance_delta: f32,
    completeness_delta: f32,
    depth_delta: f32,
    accuracy_delta: f32,
}

const GREETINGS: &[&str] = &["hello", "hi ", "hi,", "greetings", "dear", "good morning", "good afternoon", "good evening"];

/// Gate A: if the query had no greeting, the output must not open with one.
fn gate_persona(query: &str, output: &str) -> GateOutcome {
    let query_has_greeting = starts_with_any(&query.to_lowercase(), GREETINGS);
    let output_has_greeting = starts_with_any(&output.to_lowercase(), GREETINGS);

    if output_has_greeting && !query_has_greeting {
        GateOutcome {
            passed: false,
            violations: vec!["persona:unsolicited_greeting".to_string()],
            accuracy_delta: -2.0,
            ..Default::default()
        }
    } else {
        GateOutcome {
            passed: true,
            accuracy_delta: 0.5,
            ..Default::default()
        }
    }
}

fn starts_with_any(haystack: &str, needles: &[&str]) -> bool {
    let trimmed = haystack.trim_start();
    needles.iter().any(|n| trimmed.starts_with(n))
}

/// Gate B: forbidden terms must not appear; in strict mode, every allowed
/// term must appear. Word-boundary, case-insensitive.
fn gate_lexicon(pack: &ContextPack, output: &str) -> GateOutcome {
    let mut violations = Vec::new();
    for forbidden in &pack.lexicon_lock.forbidden_terms {
        if contains_word(output, forbidden) {
            violations.push(format!("lexicon:forbidden:{forbidden}"));
        }
    }
    if pack.lexicon_lock.strict {
        for allowed in &pack.lexicon_lock.allowed_terms {
            if !contains_word(output, allowed) {
                violations.push(format!("lexicon:missing_allowed:{allowed}"));
            }
        }
    }
    let passed = violations.is_empty();
    GateOutcome {
        substance_delta: if passed { 0.5 } else { -3.0 },
        passed,
        violations,
        ..Default::default()
    }
}

/// Word-boundary, case-insensitive substring match without a regex
/// dependency: split on non-alphanumeric runs and compare case-folded
/// tokens.
fn contains_word(haystack: &str, needle: &str) -> bool {
    let needle_lower = needle.to_lowercase();
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .any(|token| token.to_lowercase() == needle_lower)
}

/// Gate C: every required heading must appear as a markdown heading; if
/// `file_count` is set, the number of fenced code blocks must match
/// exactly.
fn gate_output_contract(pack: &ContextPack, output: &str) -> GateOutcome {
    let headings = extract_headings(output);
    let mut violations = Vec::new();

    for required in &pack.output_contract.required_headings {
        if !headings.iter().any(|h| h.eq_ignore_ascii_case(required)) {
            violations.push(format!("contract:missing_heading:{required}"));
        }
    }

    if let Some(expected) = pack.output_contract.file_count {
        let actual = count_code_blocks(output);
        if actual != expected {
            violations.push(format!("contract:file_count:expected={expected}:actual={actual}"));
        }
    }

    let passed = violations.is_empty();
    GateOutcome {
        completeness_delta: if passed { 1.0 } else { -3.0 },
        passed,
        violations,
        ..Default::default()
    }
}

fn extract_headings(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim_start();
            if trimmed.starts_with('#') {
                Some(trimmed.trim_start_matches('#').trim().to_string())
            } else {
                None
            }
        })
        .collect()
}

fn count_code_blocks(output: &str) -> usize {
    output.matches("```").count() / 2
}

/// Gate D: heuristic completeness — at least one heading, at least one
/// enumerated/numbered step, no adjacent duplicate sections.
fn gate_completeness(output: &str) -> GateOutcome {
    let headings = extract_headings(output);
    let has_heading = !headings.is_empty();
    let has_step = output.lines().any(|l| {
        let t = l.trim_start();
        t.starts_with('-') || t.starts_with('*') || starts_with_digit_dot(t)
    });
    let has_duplicate_adjacent = headings.windows(2).any(|w| w[0].eq_ignore_ascii_case(&w[1]));

    let mut violations = Vec::new();
    if !has_heading {
        violations.push("completeness:no_heading".to_string());
    }
    if !has_step {
        violations.push("completeness:no_enumerated_step".to_string());
    }
    if has_duplicate_adjacent {
        violations.push("completeness:duplicate_adjacent_section".to_string());
    }

    let passed = violations.is_empty();
    GateOutcome {
        depth_delta: if passed { 1.0 } else { -2.0 },
        passed,
        violations,
        ..Default::default()
    }
}

fn starts_with_digit_dot(line: &str) -> bool {
    let mut chars = line.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => chars.next() == Some('.'),
        _ => false,
    }
}

/// Gate E: domain-specific keyword-activated requirements. Currently
/// recognises the "incident" domain from the design notes' worked example;
/// additional domains are added by extending `DOMAIN_RULES`.
struct DomainRule {
    goal_keyword: &'static str,
    required_mentions: &'static [&'static str],
}

const DOMAIN_RULES: &[DomainRule] = &[DomainRule {
    goal_keyword: "incident",
    required_mentions: &["severity", "escalation", "roles"],
}];

fn gate_domain_completeness(pack: &ContextPack, output: &str) -> GateOutcome {
    let goal_lower = pack.goal.to_lowercase();
    let output_lower = output.to_lowercase();
    let mut violations = Vec::new();

    for rule in DOMAIN_RULES {
        if goal_lower.contains(rule.goal_keyword) {
            for mention in rule.required_mentions {
                if !output_lower.contains(mention) {
                    violations.push(format!("domain:{}:missing:{}", rule.goal_keyword, mention));
                }
            }
        }
    }

    let passed = violations.is_empty();
    GateOutcome {
        substance_delta: if passed { 0.0 } else { -2.0 },
        passed,
        violations,
        ..Default::default()
    }
}

/// Apply all five gates and fold them into a final `QualityScore`.
///
/// Overall = weighted mean of {substance .30, completeness .30, depth .20,
/// accuracy .20}, each dimension starting at a neutral 7.0 baseline and
/// shifted by gate deltas, clamped to [0, 10]. Gate passes iff overall >=
/// 7.0 AND no individual dimension < 5.0 AND Gates A/B/C all pass.
pub fn validate(query: &str, pack: &ContextPack, output: &str) -> QualityScore {
    let gate_a = gate_persona(query, output);
    let gate_b = gate_lexicon(pack, output);
    let gate_c = gate_output_contract(pack, output);
    let gate_d = gate_completeness(output);
    let gate_e = gate_domain_completeness(pack, output);

    let baseline = 7.0f32;
    let substance = (baseline + gate_a.substance_delta + gate_b.substance_delta + gate_e.substance_delta).clamp(0.0, 10.0);
    let completeness = (baseline + gate_c.completeness_delta).clamp(0.0, 10.0);
    let depth = (baseline + gate_d.depth_delta).clamp(0.0, 10.0);
    let accuracy = (baseline + gate_a.accuracy_delta).clamp(0.0, 10.0);

    let overall = substance * 0.30 + completeness * 0.30 + depth * 0.20 + accuracy * 0.20;

    let required_gates_pass = gate_a.passed && gate_b.passed && gate_c.passed;
    let no_dimension_below_five = [substance, completeness, depth, accuracy].iter().all(|d| *d >= 5.0);
    let gate_passed = overall >= 7.0 && no_dimension_below_five && required_gates_pass;

    let mut violations = Vec::new();
    violations.extend(gate_a.violations);
    violations.extend(gate_b.violations);
    violations.extend(gate_c.violations);
    violations.extend(gate_d.violations);
    violations.extend(gate_e.violations);

    QualityScore {
        substance,
        completeness,
        depth,
        accuracy,
        overall,
        gate_passed,
        violations,
    }
}
