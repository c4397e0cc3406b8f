//! Problem extraction
//!
//! Turns a query plus its detected intent into a `Problem`:
//! - notation is normalised (unicode and spoken operators, `**`)
//! - intervals, pinned unknowns and constraint clauses are lifted out
//! - the remaining text is split into segments and the mathematical span
//!   of each segment is parsed with the expression grammar

use crate::error::ParseError;
use crate::types::{Intent, Problem, ProblemType};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use verimath_backend::Sense;
use verimath_expr::{
    parse_constraint, parse_equation, parse_expr, Constraint, Equation, Expr, Func, Statement,
};

const NUMBER: &str = r"([-+]?(?:[0-9.]+\*?)?(?:pi)?)";

fn regex(pattern: &str) -> Option<Regex> {
    Regex::new(pattern).ok()
}

static INTERVALS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        format!(r"\bfrom\s+{NUMBER}\s+to\s+{NUMBER}"),
        format!(r"\bbetween\s+{NUMBER}\s+and\s+{NUMBER}"),
        format!(r"\b(?:on|over|in)\s*\[\s*{NUMBER}\s*,\s*{NUMBER}\s*\]"),
    ]
    .iter()
    .filter_map(|p| regex(p))
    .collect()
});

static PINNED: Lazy<Option<Regex>> = Lazy::new(|| {
    regex(r"\b(?:for|with respect to|wrt|find)\s+([a-z][0-9]*(?:\s*(?:,|and)\s*[a-z][0-9]*)*)\b")
});

static EVALUATE_AT: Lazy<Option<Regex>> = Lazy::new(|| regex(&format!(r"\bat\s+([a-z][0-9]*)\s*=\s*{NUMBER}")));

static CLAUSE: Lazy<Option<Regex>> =
    Lazy::new(|| regex(r"\b(?:where|such that|subject to|given that|given|provided that)\b"));

static SENSE: Lazy<Option<Regex>> = Lazy::new(|| regex(r"\b(maximi[sz]e|minimi[sz]e|maximum|minimum)\b"));

static OBJECTIVE: Lazy<Option<Regex>> =
    Lazy::new(|| regex(r"\b(?:maximi[sz]e|minimi[sz]e|optimi[sz]e|maximum of|minimum of)\b"));

static ORDER: Lazy<Option<Regex>> =
    Lazy::new(|| regex(r"\b(second|third|fourth|[0-9]+(?:st|nd|rd|th))\s+(?:order\s+)?derivative"));

static SEGMENT_SPLIT: Lazy<Option<Regex>> = Lazy::new(|| regex(r";|,|\band\b"));

const SPOKEN_OPERATORS: [(&str, &str); 8] = [
    (" is equal to ", " = "),
    (" equals ", " = "),
    (" plus ", " + "),
    (" minus ", " - "),
    (" times ", " * "),
    (" divided by ", " / "),
    (" squared", "^2"),
    (" cubed", "^3"),
];

/// Lower-case and rewrite operator spellings into the expression grammar
#[must_use]
pub fn normalize(query: &str) -> String {
    let mut text = format!(" {} ", query.to_lowercase());
    for (from, to) in [
        ("\u{2212}", "-"),
        ("\u{00d7}", "*"),
        ("\u{00b7}", "*"),
        ("\u{00f7}", "/"),
        ("\u{2264}", "<="),
        ("\u{2265}", ">="),
        ("\u{2260}", "!="),
        ("\u{03c0}", "pi"),
        ("\u{00b2}", "^2"),
        ("\u{00b3}", "^3"),
        ("**", "^"),
        ("==", "="),
        (":", " "),
        ("?", " "),
    ] {
        text = text.replace(from, to);
    }
    for (from, to) in SPOKEN_OPERATORS {
        text = text.replace(from, to);
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn constant(text: &str) -> Option<f64> {
    parse_expr(text).ok()?.constant_value().filter(|v| v.is_finite())
}

/// Blank out a byte range, keeping the rest of the text in place
fn cut(text: &mut String, range: std::ops::Range<usize>) {
    text.replace_range(range, " ");
}

fn is_relation_char(c: char) -> bool {
    matches!(c, '<' | '>' | '!')
}

/// Whether a whitespace-separated word belongs to a formula
fn is_math_word(word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    if word
        .chars()
        .any(|c| c.is_ascii_digit() || "+-*/^=()[]|<>!\u{221a}".contains(c))
    {
        return true;
    }
    if !word.chars().all(|c| c.is_ascii_alphabetic()) {
        return false;
    }
    if word.len() == 1 || word == "pi" {
        return true;
    }
    // function names glued to at most one variable: sin, sinx, ln
    Func::longest_prefix(word).is_some_and(|f| word.len() - f.name().len() <= 1)
}

/// Whether a word supplies an operand (as opposed to a bare operator)
fn has_operand(word: &str) -> bool {
    word.chars().any(|c| c.is_ascii_alphanumeric() || c == '\u{221a}')
}

/// Longest formula-looking run of words in `segment`
fn math_span(segment: &str) -> Option<String> {
    let words: Vec<&str> = segment
        .split_whitespace()
        .map(|w| w.trim_end_matches(['.', '!']).trim_matches(['"', '\'']))
        .collect();
    let mut best: Option<(usize, String)> = None;
    let mut i = 0;
    while i < words.len() {
        if !is_math_word(words[i]) {
            i += 1;
            continue;
        }
        let start = i;
        while i < words.len() && is_math_word(words[i]) {
            i += 1;
        }
        let run = &words[start..i];
        if !run.iter().any(|w| has_operand(w)) {
            continue;
        }
        let text = run.join(" ");
        let structured = text.chars().any(|c| c.is_ascii_digit() || "+-*/^=()<>|".contains(c));
        let lone_call = run.len() == 1 && Func::longest_prefix(run[0]).is_some();
        if !structured && !lone_call {
            continue;
        }
        let relation = text.contains('=') || text.chars().any(is_relation_char);
        let score = usize::from(relation) * 10_000 + text.len();
        if best.as_ref().map_or(true, |(s, _)| score > *s) {
            best = Some((score, text));
        }
    }
    best.map(|(_, text)| text)
}

fn expr_error(segment: &str, source: verimath_expr::ExprError) -> ParseError {
    ParseError::Expr {
        segment: segment.to_string(),
        source,
    }
}

/// What one segment contributed
enum Fragment {
    Equation(Equation),
    Expression(Expr),
    Constraint(Constraint),
}

fn parse_fragment(span: &str) -> Result<Fragment, ParseError> {
    if span.contains('<') || span.contains('>') || span.contains("!=") {
        return parse_constraint(span)
            .map(Fragment::Constraint)
            .map_err(|e| expr_error(span, e));
    }
    if span.contains('=') {
        return parse_equation(span)
            .map(Fragment::Equation)
            .map_err(|e| expr_error(span, e));
    }
    parse_expr(span).map(Fragment::Expression).map_err(|e| expr_error(span, e))
}

/// Fragments from every segment of `text`
fn fragments(text: &str) -> Result<Vec<Fragment>, ParseError> {
    let segments: Vec<&str> = match SEGMENT_SPLIT.as_ref() {
        Some(split) => split.split(text).collect(),
        None => vec![text],
    };
    segments
        .into_iter()
        .filter_map(math_span)
        .map(|span| parse_fragment(&span))
        .collect()
}

/// Converts query text into a `Problem`
#[derive(Debug, Clone, Copy, Default)]
pub struct ProblemParser;

impl ProblemParser {
    /// Parser with the built-in notation rules
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Parse `query` under the detected `intent`
    ///
    /// # Errors
    /// - `ParseError::NotMath` when the intent is not mathematical
    /// - `ParseError::NoGoal` / `NoUnknowns` when nothing actionable is found
    /// - `ParseError::Expr` when a formula span does not parse
    pub fn parse(&self, query: &str, intent: &Intent) -> Result<Problem, ParseError> {
        if !intent.is_math {
            return Err(ParseError::NotMath {
                confidence: intent.confidence,
            });
        }
        let mut text = normalize(query);
        let interval = Self::take_interval(&mut text);
        let evaluate_at = Self::take_evaluation_point(&mut text);
        let pinned = Self::take_pinned(&mut text);
        let order = Self::derivative_order(&text);
        let sense = SENSE
            .as_ref()
            .and_then(|re| re.captures(&text))
            .map(|c| if c[1].starts_with("max") { Sense::Maximize } else { Sense::Minimize });

        let (main, clause) = match CLAUSE.as_ref().and_then(|re| re.find(&text)) {
            Some(m) => (text[..m.start()].to_string(), text[m.end()..].to_string()),
            None => (text.clone(), String::new()),
        };

        let mut equations = Vec::new();
        let mut expressions = Vec::new();
        let mut constraints = Vec::new();
        let mut bindings = Vec::new();
        let clause_fragments = fragments(&clause)?.into_iter().map(|f| (true, f));
        for (in_clause, fragment) in fragments(&main)?.into_iter().map(|f| (false, f)).chain(clause_fragments) {
            match fragment {
                // `where a = 3` binds a parameter rather than adding an equation
                Fragment::Equation(Equation { lhs: Expr::Var(name), rhs })
                    if in_clause && rhs.constant_value().is_some() =>
                {
                    bindings.push((name, rhs));
                }
                Fragment::Equation(eq) if !equations.contains(&eq) => equations.push(eq),
                Fragment::Expression(expr) => expressions.push(expr),
                Fragment::Constraint(c) => constraints.push(c),
                Fragment::Equation(_) => {}
            }
        }
        for (name, value) in &bindings {
            for eq in &mut equations {
                *eq = Equation::new(eq.lhs.substitute(name, value), eq.rhs.substitute(name, value));
            }
            for expr in &mut expressions {
                *expr = expr.substitute(name, value);
            }
            for c in &mut constraints {
                c.lhs = c.lhs.substitute(name, value);
                c.rhs = c.rhs.substitute(name, value);
            }
        }

        let mut goal_type = intent.problem_type;
        if evaluate_at.is_some() && equations.is_empty() && goal_type == ProblemType::Solve {
            goal_type = ProblemType::Compute;
        }
        let knowns: Vec<Statement> = match goal_type {
            ProblemType::Optimize => {
                let objective = Self::objective(&main)?
                    .or_else(|| expressions.first().cloned())
                    .ok_or_else(|| ParseError::NoGoal(query.trim().to_string()))?;
                vec![Statement::Expression { expr: objective }]
            }
            ProblemType::Solve | ProblemType::Compute if !equations.is_empty() => {
                goal_type = ProblemType::Solve;
                equations.into_iter().map(Statement::Equation).collect()
            }
            ProblemType::Solve => expressions
                .into_iter()
                .take(1)
                .map(|e| Statement::Equation(Equation::new(e, Expr::Num(0.0))))
                .collect(),
            ProblemType::Prove => equations
                .into_iter()
                .map(Statement::Equation)
                .chain(expressions.into_iter().map(|expr| Statement::Expression { expr }))
                .collect(),
            _ => {
                // `f(x) = ...` and `y = ...` name the expression being operated on
                let expr = expressions
                    .into_iter()
                    .next()
                    .or_else(|| equations.into_iter().next().map(|eq| eq.rhs));
                expr.map(|expr| vec![Statement::Expression { expr }]).unwrap_or_default()
            }
        };

        if knowns.is_empty() && !(goal_type == ProblemType::Prove && !constraints.is_empty()) {
            return Err(ParseError::NoGoal(query.trim().to_string()));
        }

        let mut knowns = knowns;
        if goal_type == ProblemType::Compute {
            if let (Some((var, value)), Some(Statement::Expression { expr })) = (&evaluate_at, knowns.first_mut()) {
                *expr = expr.substitute(var, &Expr::Num(*value));
            }
            let has_vars = knowns.iter().any(|s| !s.variables().is_empty());
            if has_vars {
                goal_type = ProblemType::Simplify;
            }
        }

        let mentioned: BTreeSet<String> = knowns
            .iter()
            .flat_map(Statement::variables)
            .chain(constraints.iter().flat_map(|c| {
                let mut v = c.lhs.variables();
                v.extend(c.rhs.variables());
                v
            }))
            .collect();
        let in_knowns: BTreeSet<String> = knowns.iter().flat_map(Statement::variables).collect();
        let pinned: Vec<String> = pinned.into_iter().filter(|v| in_knowns.contains(v)).collect();
        let unknowns: Vec<String> = match goal_type {
            _ if !pinned.is_empty() => pinned,
            ProblemType::Differentiate | ProblemType::Integrate if in_knowns.len() > 1 => {
                let var = if in_knowns.contains("x") {
                    "x".to_string()
                } else {
                    in_knowns.iter().next().cloned().unwrap_or_default()
                };
                vec![var]
            }
            ProblemType::Prove => mentioned.into_iter().collect(),
            _ => in_knowns.into_iter().collect(),
        };

        let needs_unknowns = matches!(
            goal_type,
            ProblemType::Solve
                | ProblemType::Optimize
                | ProblemType::Gradient
                | ProblemType::Differentiate
                | ProblemType::Integrate
                | ProblemType::Factor
        );
        if needs_unknowns && unknowns.is_empty() {
            return Err(ParseError::NoUnknowns(query.trim().to_string()));
        }
        if goal_type == ProblemType::Integrate && interval.is_some() {
            // a definite integral must leave no free parameters behind
            let free: Vec<String> = knowns
                .iter()
                .flat_map(Statement::variables)
                .filter(|v| !unknowns.contains(v))
                .collect();
            if let (false, Some(statement)) = (free.is_empty(), knowns.first()) {
                return Err(ParseError::Unsupported {
                    goal: "integrate".to_string(),
                    statement: statement.to_string(),
                });
            }
        }

        let sense = match goal_type {
            ProblemType::Optimize => Some(sense.unwrap_or(Sense::Minimize)),
            _ => None,
        };
        let problem = Problem {
            goal: Self::goal_text(goal_type, &knowns, &unknowns, interval, sense),
            goal_type,
            knowns,
            unknowns,
            constraints,
            domain: intent.domain,
            interval,
            sense,
            order,
            raw: query.to_string(),
        };
        tracing::debug!(goal = %problem.goal, constraints = problem.constraints.len(), "problem parsed");
        Ok(problem)
    }

    fn take_interval(text: &mut String) -> Option<(f64, f64)> {
        for re in INTERVALS.iter() {
            let Some(caps) = re.captures(text) else {
                continue;
            };
            let (Some(a), Some(b)) = (constant(&caps[1]), constant(&caps[2])) else {
                continue;
            };
            let range = caps.get(0).map(|m| m.range());
            if let Some(range) = range {
                cut(text, range);
            }
            return Some(if a <= b { (a, b) } else { (b, a) });
        }
        None
    }

    fn take_evaluation_point(text: &mut String) -> Option<(String, f64)> {
        let re = EVALUATE_AT.as_ref()?;
        let caps = re.captures(text)?;
        let value = constant(&caps[2])?;
        let var = caps[1].to_string();
        let range = caps.get(0)?.range();
        cut(text, range);
        Some((var, value))
    }

    fn take_pinned(text: &mut String) -> Vec<String> {
        let Some(re) = PINNED.as_ref() else {
            return Vec::new();
        };
        let mut pinned = Vec::new();
        let mut ranges = Vec::new();
        for caps in re.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            // `for x^2 ...` is a formula, not a variable list
            let next = text[whole.end()..].trim_start().chars().next();
            if next.is_some_and(|c| "=^*/+-(<>".contains(c)) {
                continue;
            }
            pinned.extend(
                caps[1]
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|w| !w.is_empty() && *w != "and")
                    .map(str::to_string),
            );
            ranges.push(whole.range());
        }
        for range in ranges.into_iter().rev() {
            cut(text, range);
        }
        pinned
    }

    fn derivative_order(text: &str) -> u32 {
        let Some(caps) = ORDER.as_ref().and_then(|re| re.captures(text)) else {
            return 1;
        };
        match &caps[1] {
            "second" => 2,
            "third" => 3,
            "fourth" => 4,
            ordinal => ordinal
                .trim_end_matches(|c: char| c.is_ascii_alphabetic())
                .parse()
                .unwrap_or(1),
        }
    }

    /// Formula following the optimisation verb
    fn objective(main: &str) -> Result<Option<Expr>, ParseError> {
        let Some(m) = OBJECTIVE.as_ref().and_then(|re| re.find_iter(main).last()) else {
            return Ok(None);
        };
        let Some(span) = math_span(&main[m.end()..]) else {
            return Ok(None);
        };
        // `f(x) = ...` names the objective
        let body = span.rsplit('=').next().unwrap_or(&span).trim().to_string();
        parse_expr(&body).map(Some).map_err(|e| expr_error(&body, e))
    }

    fn goal_text(
        goal_type: ProblemType,
        knowns: &[Statement],
        unknowns: &[String],
        interval: Option<(f64, f64)>,
        sense: Option<Sense>,
    ) -> String {
        let statements: Vec<String> = knowns.iter().map(ToString::to_string).collect();
        let verb = match sense {
            Some(Sense::Maximize) => "maximize".to_string(),
            Some(Sense::Minimize) => "minimize".to_string(),
            None => goal_type.to_string(),
        };
        let mut goal = format!("{verb} {}", statements.join("; "));
        if !unknowns.is_empty() {
            goal.push_str(&format!(" for {}", unknowns.join(", ")));
        }
        if let Some((a, b)) = interval {
            goal.push_str(&format!(
                " on [{}, {}]",
                verimath_expr::format_number(a),
                verimath_expr::format_number(b)
            ));
        }
        goal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::Detector;
    use pretty_assertions::assert_eq;
    use verimath_expr::Relation;

    fn parse(query: &str) -> Result<Problem, ParseError> {
        let intent = Detector::new().detect(query);
        ProblemParser::new().parse(query, &intent)
    }

    #[test]
    fn quadratic_equation() {
        let p = parse("solve x^2 - 4 = 0").unwrap();
        assert_eq!(p.goal_type, ProblemType::Solve);
        assert_eq!(p.unknowns, vec!["x"]);
        assert_eq!(p.knowns.len(), 1);
        assert_eq!(p.goal, "solve x^2 - 4 = 0 for x");
    }

    #[test]
    fn notations_normalise_to_one_form() {
        let a = parse("solve x**2 - 4 = 0").unwrap();
        let b = parse("Solve x\u{00b2} \u{2212} 4 = 0").unwrap();
        assert_eq!(a.knowns, b.knowns);
        assert_eq!(normalize("x squared minus 4 equals 0"), "x^2 - 4 = 0");
    }

    #[test]
    fn system_from_and_separated_segments() {
        let p = parse("solve 2x + y = 5 and x - y = 1").unwrap();
        assert_eq!(p.knowns.len(), 2);
        assert_eq!(p.unknowns, vec!["x", "y"]);
        assert!(p.is_system());
    }

    #[test]
    fn constraint_clause() {
        let p = parse("solve x^2 = 9 where x > 0").unwrap();
        assert_eq!(p.knowns.len(), 1);
        assert_eq!(p.constraints.len(), 1);
        assert_eq!(p.constraints[0].relation, Relation::Gt);
    }

    #[test]
    fn pinned_unknown() {
        let p = parse("solve a*x + 2 = 8 for x where a = 3").unwrap();
        assert_eq!(p.unknowns, vec!["x"]);
        assert_eq!(p.knowns.len(), 1);
        assert_eq!(p.knowns[0].to_string(), "3*x + 2 = 8");
    }

    #[test]
    fn interval_and_integral() {
        let p = parse("integrate x^2 from 0 to 3").unwrap();
        assert_eq!(p.goal_type, ProblemType::Integrate);
        assert_eq!(p.interval, Some((0.0, 3.0)));
        assert_eq!(p.knowns[0].to_string(), "x^2");
        let q = parse("integrate sin(x) on [0, pi]").unwrap();
        assert_eq!(q.interval, Some((0.0, std::f64::consts::PI)));
    }

    #[test]
    fn objective_and_sense() {
        let p = parse("optimize drug dosage d to maximize 10*d - d^2").unwrap();
        assert_eq!(p.goal_type, ProblemType::Optimize);
        assert_eq!(p.sense, Some(Sense::Maximize));
        assert_eq!(p.unknowns, vec!["d"]);
        assert_eq!(p.knowns[0].to_string(), "10*d - d^2");

        let q = parse("minimize f(x) = x^2 + 1 subject to x >= 1").unwrap();
        assert_eq!(q.sense, Some(Sense::Minimize));
        assert_eq!(q.knowns[0].to_string(), "x^2 + 1");
        assert_eq!(q.constraints.len(), 1);
    }

    #[test]
    fn prose_objective_has_no_goal() {
        let err = parse("optimize drug dosage to maximize absorption minus toxicity").unwrap_err();
        assert!(matches!(err, ParseError::NoGoal(_)));
    }

    #[test]
    fn non_math_is_rejected() {
        let err = parse("tell me a story").unwrap_err();
        assert!(matches!(err, ParseError::NotMath { .. }));
    }

    #[test]
    fn compute_with_evaluation_point() {
        let p = parse("evaluate x^2 + 1 at x = 3").unwrap();
        assert_eq!(p.goal_type, ProblemType::Compute);
        assert!(p.unknowns.is_empty());
        assert_eq!(
            p.knowns[0].target().eval(&std::collections::BTreeMap::new()).unwrap(),
            10.0
        );
    }

    #[test]
    fn derivative_order_words() {
        let p = parse("find the second derivative of x^4").unwrap();
        assert_eq!(p.goal_type, ProblemType::Differentiate);
        assert_eq!(p.order, 2);
    }

    #[test]
    fn roots_of_expression_become_equation() {
        let p = parse("find the roots of x^2 - 5x + 6").unwrap();
        assert_eq!(p.goal_type, ProblemType::Solve);
        assert!(p.knowns[0].as_equation().is_some());
    }

    #[test]
    fn gradient_keeps_all_variables() {
        let p = parse("find the gradient of x^2*y + y^3").unwrap();
        assert_eq!(p.goal_type, ProblemType::Gradient);
        assert_eq!(p.unknowns, vec!["x", "y"]);
    }

    #[test]
    fn math_span_skips_prose() {
        assert_eq!(math_span("please factor x^2 - 4 now").as_deref(), Some("x^2 - 4"));
        assert_eq!(math_span("find a root"), None);
        assert_eq!(math_span("absorption - toxicity"), None);
    }
}
