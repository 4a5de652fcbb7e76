use std::collections::BTreeSet;

use rand::RngExt;
use thiserror::Error;

use crate::eval::{normalize, EPSILON};
use crate::difficulty::Difficulty;

/// Every Hectoc puzzle evaluates to exactly this.
pub const TARGET: f64 = 100.0;

/// Operators the enumerator inserts. `^` is accepted by the evaluator but
/// never emitted here.
const OPS: [char; 4] = ['+', '-', '*', '/'];

const GENERATE_ATTEMPTS: usize = 100;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerateError {
    #[error("no puzzle found for difficulty {target:?} after {attempts} attempts")]
    NoPuzzleFound { target: Difficulty, attempts: usize },
}

/// A generated sequence together with all of its solutions.
#[derive(Debug, Clone)]
pub struct GeneratedPuzzle {
    pub sequence: String,
    pub solutions: Vec<String>,
}

/// One enumerated subexpression: its value, rendered text, and the
/// precedence of its top-level operator (atoms rank highest).
#[derive(Debug, Clone)]
struct Candidate {
    value: f64,
    text: String,
    prec: u8,
}

fn op_prec(op: char) -> u8 {
    match op {
        '+' | '-' => 1,
        _ => 2,
    }
}

/// Combine two candidates under `op`, adding parentheses only where the
/// rendering would otherwise re-associate. Division by zero prunes the branch.
fn combine(left: &Candidate, right: &Candidate, op: char) -> Option<Candidate> {
    let prec = op_prec(op);
    let value = match op {
        '+' => left.value + right.value,
        '-' => left.value - right.value,
        '*' => left.value * right.value,
        '/' => {
            if right.value.abs() < EPSILON {
                return None;
            }
            left.value / right.value
        }
        _ => return None,
    };

    let wrap_left = left.prec < prec;
    // The right child also needs parens under the non-commutative operators.
    let wrap_right = right.prec < prec || (right.prec == prec && (op == '-' || op == '/'));

    let mut text = String::with_capacity(left.text.len() + right.text.len() + 5);
    if wrap_left {
        text.push('(');
        text.push_str(&left.text);
        text.push(')');
    } else {
        text.push_str(&left.text);
    }
    text.push(op);
    if wrap_right {
        text.push('(');
        text.push_str(&right.text);
        text.push(')');
    } else {
        text.push_str(&right.text);
    }

    Some(Candidate { value, text, prec })
}

/// All operator trees over an in-order run of numbers.
fn combos(parts: &[(f64, String)]) -> Vec<Candidate> {
    if parts.len() == 1 {
        return vec![Candidate {
            value: parts[0].0,
            text: parts[0].1.clone(),
            prec: u8::MAX,
        }];
    }

    let mut out = Vec::new();
    for split in 1..parts.len() {
        let lefts = combos(&parts[..split]);
        let rights = combos(&parts[split..]);
        for l in &lefts {
            for r in &rights {
                for op in OPS {
                    if let Some(c) = combine(l, r, op) {
                        out.push(c);
                    }
                }
            }
        }
    }
    out
}

/// Enumerate every way to group the digit sequence into in-order multi-digit
/// numbers (compositions of its length).
fn groupings(sequence: &str) -> Vec<Vec<(f64, String)>> {
    let digits: Vec<char> = sequence.chars().collect();
    let n = digits.len();
    let mut out = Vec::new();

    // Each bit decides whether to cut after digit i.
    for mask in 0..(1u32 << (n - 1)) {
        let mut parts = Vec::new();
        let mut start = 0;
        for i in 0..n {
            let cut = i == n - 1 || mask & (1 << i) != 0;
            if cut {
                let text: String = digits[start..=i].iter().collect();
                let value = text.parse::<f64>().unwrap_or(0.0);
                parts.push((value, text));
                start = i + 1;
            }
        }
        out.push(parts);
    }
    out
}

/// Enumerate every solution for a digit sequence: all in-order groupings,
/// all operator trees, rendered with minimal parentheses, deduplicated,
/// in deterministic order.
pub fn solutions(sequence: &str) -> Vec<String> {
    let mut found = BTreeSet::new();
    for parts in groupings(sequence) {
        for candidate in combos(&parts) {
            if (candidate.value - TARGET).abs() < EPSILON {
                found.insert(candidate.text);
            }
        }
    }
    found.into_iter().collect()
}

/// Elegance penalty: cheap additive operators, pricier multiplicative ones,
/// parenthesis count, nesting depth, and a mild length term.
pub fn complexity(expr: &str) -> f64 {
    let normalized = normalize(expr);
    let mut score = 0.0;
    let mut parens = 0u32;
    let mut depth = 0i32;
    let mut max_depth = 0i32;

    for c in normalized.chars() {
        match c {
            '+' | '-' => score += 1.0,
            '*' | '/' => score += 1.5,
            '(' => {
                parens += 1;
                depth += 1;
                max_depth = max_depth.max(depth);
            }
            ')' => depth -= 1,
            _ => {}
        }
    }

    score += 0.5 * parens as f64;
    score += 0.5 * max_depth as f64;
    score += 0.5 * (normalized.len().max(1) as f64).log10();
    score
}

/// The most elegant solution: minimum complexity, ties broken
/// lexicographically.
pub fn optimal<'a>(solutions: &'a [String]) -> Option<&'a str> {
    solutions
        .iter()
        .min_by(|a, b| {
            complexity(a)
                .partial_cmp(&complexity(b))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cmp(b))
        })
        .map(|s| s.as_str())
}

/// Difficulty from the solution set: average complexity (weighted 7, capped)
/// plus a scarcity factor, bucketed into the five levels.
pub fn difficulty_for(solutions: &[String]) -> Difficulty {
    let avg = if solutions.is_empty() {
        0.0
    } else {
        solutions.iter().map(|s| complexity(s)).sum::<f64>() / solutions.len() as f64
    };
    let complexity_part = (avg / 10.0).min(1.0) * 7.0;
    let count_factor = match solutions.len() {
        0..=1 => 3.0,
        2..=3 => 2.5,
        4..=5 => 2.0,
        6..=10 => 1.5,
        11..=20 => 1.0,
        _ => 0.5,
    };

    let s = complexity_part + count_factor;
    if s < 2.0 {
        Difficulty::D1
    } else if s < 4.0 {
        Difficulty::D2
    } else if s < 6.0 {
        Difficulty::D3
    } else if s < 8.0 {
        Difficulty::D4
    } else {
        Difficulty::D5
    }
}

/// A random six-digit sequence over '1'..'9'.
pub fn random_sequence() -> String {
    let mut rng = rand::rng();
    (0..6)
        .map(|_| char::from(b'0' + rng.random_range(1..=9u8)))
        .collect()
}

/// Retry random sequences until one lands within one level of `target`.
pub fn generate_with_difficulty(target: Difficulty) -> Result<GeneratedPuzzle, GenerateError> {
    for _ in 0..GENERATE_ATTEMPTS {
        let sequence = random_sequence();
        let sols = solutions(&sequence);
        if sols.is_empty() {
            continue;
        }
        let d = difficulty_for(&sols);
        if (d.level() as i32 - target.level() as i32).abs() <= 1 {
            return Ok(GeneratedPuzzle {
                sequence,
                solutions: sols,
            });
        }
    }
    Err(GenerateError::NoPuzzleFound {
        target,
        attempts: GENERATE_ATTEMPTS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{evaluate, extract_digits};

    #[test]
    fn solutions_evaluate_to_target() {
        let sols = solutions("123456");
        assert!(!sols.is_empty());
        for s in &sols {
            let v = evaluate(s).unwrap();
            assert!((v - TARGET).abs() < EPSILON, "{} = {}", s, v);
        }
    }

    #[test]
    fn solutions_preserve_digit_order() {
        for s in solutions("123456") {
            assert_eq!(extract_digits(&s), "123456", "bad digits in {}", s);
        }
    }

    #[test]
    fn solutions_are_unique() {
        let sols = solutions("123456");
        let set: BTreeSet<&String> = sols.iter().collect();
        assert_eq!(set.len(), sols.len());
    }

    #[test]
    fn concatenation_counts_as_grouping() {
        // 111-11*1 spells six ones and lands exactly on 100.
        let sols = solutions("111111");
        assert!(sols.iter().any(|s| s == "111-11*1"), "{:?}", sols);
    }

    #[test]
    fn unreachable_target_yields_empty_set() {
        // A lone digit can never reach 100.
        assert!(solutions("7").is_empty());
    }

    #[test]
    fn optimal_is_minimal_complexity() {
        let sols = solutions("123456");
        let best = optimal(&sols).unwrap();
        let best_c = complexity(best);
        for s in &sols {
            assert!(best_c <= complexity(s) + EPSILON);
        }
    }

    #[test]
    fn complexity_prefers_fewer_operators() {
        assert!(complexity("50+50") < complexity("(2+3)*(4*5)"));
    }

    #[test]
    fn complexity_counts_nesting() {
        let flat = complexity("1+2*3");
        let nested = complexity("((1+2))*3");
        assert!(nested > flat);
    }

    #[test]
    fn difficulty_scarcity_raises_level() {
        let many: Vec<String> = (0..30).map(|i| format!("{}+2+3", i)).collect();
        let few = vec!["1*2*3+4".to_string()];
        assert!(difficulty_for(&few).level() >= difficulty_for(&many).level());
    }

    #[test]
    fn random_sequence_is_six_nonzero_digits() {
        for _ in 0..50 {
            let s = random_sequence();
            assert_eq!(s.len(), 6);
            assert!(s.chars().all(|c| ('1'..='9').contains(&c)));
        }
    }

    #[test]
    fn generate_with_difficulty_stays_in_band() {
        let p = generate_with_difficulty(Difficulty::D3).unwrap();
        let d = difficulty_for(&p.solutions);
        assert!((d.level() as i32 - 3).abs() <= 1);
    }
}
