use serde::{Deserialize, Serialize};

/// A typed probe against live document state.
///
/// Predicates are data, not JS string literals: the Chrome driver compiles
/// them with [`Predicate::to_script`], the scripted test driver interprets
/// them structurally, and either way the probe logic is testable without a
/// page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Predicate {
    /// At least one element matching the selector has a non-empty box.
    Visible { selector: String },
    /// No element matching the selector is visible.
    Absent { selector: String },
    /// Some element matching the selector has visible text matching the
    /// pattern (case-insensitive).
    LabelMatch { selector: String, pattern: String },
    /// Some element matching the selector carries an attribute whose value
    /// matches the pattern.
    AttrMatch {
        selector: String,
        attribute: String,
        pattern: String,
    },
    /// The number of elements matching the selector falls in [min, max].
    CountInRange {
        selector: String,
        min: u32,
        max: Option<u32>,
    },
    /// document.readyState reached "complete".
    DocumentReady,
    AllOf(Vec<Predicate>),
    AnyOf(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn visible(selector: impl Into<String>) -> Self {
        Predicate::Visible {
            selector: selector.into(),
        }
    }

    pub fn absent(selector: impl Into<String>) -> Self {
        Predicate::Absent {
            selector: selector.into(),
        }
    }

    pub fn label_match(selector: impl Into<String>, pattern: impl Into<String>) -> Self {
        Predicate::LabelMatch {
            selector: selector.into(),
            pattern: pattern.into(),
        }
    }

    pub fn count_in_range(selector: impl Into<String>, min: u32, max: Option<u32>) -> Self {
        Predicate::CountInRange {
            selector: selector.into(),
            min,
            max,
        }
    }

    pub fn all_of(preds: impl IntoIterator<Item = Predicate>) -> Self {
        Predicate::AllOf(preds.into_iter().collect())
    }

    pub fn any_of(preds: impl IntoIterator<Item = Predicate>) -> Self {
        Predicate::AnyOf(preds.into_iter().collect())
    }

    pub fn not(pred: Predicate) -> Self {
        Predicate::Not(Box::new(pred))
    }

    /// Compile to a self-contained JS IIFE returning a boolean.
    pub fn to_script(&self) -> String {
        format!(
            r#"(function() {{
                function vis(sel) {{
                    const els = document.querySelectorAll(sel);
                    for (const el of els) {{
                        const r = el.getBoundingClientRect();
                        if (r.width > 0 && r.height > 0) return true;
                    }}
                    return false;
                }}
                function cnt(sel) {{
                    return document.querySelectorAll(sel).length;
                }}
                function label(sel, re) {{
                    const rx = new RegExp(re, 'i');
                    const els = document.querySelectorAll(sel);
                    for (const el of els) {{
                        if (rx.test((el.innerText || el.textContent || '').trim())) return true;
                    }}
                    return false;
                }}
                function attr(sel, name, re) {{
                    const rx = new RegExp(re, 'i');
                    const els = document.querySelectorAll(sel);
                    for (const el of els) {{
                        const v = el.getAttribute(name);
                        if (v !== null && rx.test(v)) return true;
                    }}
                    return false;
                }}
                return {};
            }})()"#,
            self.to_expr()
        )
    }

    fn to_expr(&self) -> String {
        match self {
            Predicate::Visible { selector } => format!("vis({})", js_str(selector)),
            Predicate::Absent { selector } => format!("!vis({})", js_str(selector)),
            Predicate::LabelMatch { selector, pattern } => {
                format!("label({}, {})", js_str(selector), js_str(pattern))
            }
            Predicate::AttrMatch {
                selector,
                attribute,
                pattern,
            } => format!(
                "attr({}, {}, {})",
                js_str(selector),
                js_str(attribute),
                js_str(pattern)
            ),
            Predicate::CountInRange { selector, min, max } => match max {
                Some(max) => format!(
                    "(cnt({sel}) >= {min} && cnt({sel}) <= {max})",
                    sel = js_str(selector)
                ),
                None => format!("cnt({}) >= {}", js_str(selector), min),
            },
            Predicate::DocumentReady => "document.readyState === 'complete'".to_string(),
            Predicate::AllOf(preds) => join_exprs(preds, " && "),
            Predicate::AnyOf(preds) => join_exprs(preds, " || "),
            Predicate::Not(inner) => format!("!({})", inner.to_expr()),
        }
    }
}

fn join_exprs(preds: &[Predicate], sep: &str) -> String {
    if preds.is_empty() {
        // Vacuous truth for AllOf; AnyOf of nothing can never hold, but an
        // empty combinator is a caller bug either way, so stay total.
        return "true".to_string();
    }
    let parts: Vec<String> = preds.iter().map(|p| format!("({})", p.to_expr())).collect();
    parts.join(sep)
}

/// Render a Rust string as a quoted, escaped JS string literal.
fn js_str(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visible_compiles_to_vis_call() {
        let script = Predicate::visible("button.add-to-cart").to_script();
        assert!(script.contains(r#"vis("button.add-to-cart")"#));
        assert!(script.starts_with("(function()"));
    }

    #[test]
    fn count_range_with_and_without_upper_bound() {
        let bounded = Predicate::count_in_range("input.otp-digit", 4, Some(6));
        assert!(bounded.to_expr().contains(">= 4"));
        assert!(bounded.to_expr().contains("<= 6"));

        let open = Predicate::count_in_range(".result-card", 1, None);
        assert_eq!(open.to_expr(), r#"cnt(".result-card") >= 1"#);
    }

    #[test]
    fn composition_parenthesizes_operands() {
        let pred = Predicate::all_of([
            Predicate::absent(".otp-dialog"),
            Predicate::any_of([
                Predicate::visible("#account-menu"),
                Predicate::not(Predicate::visible("a.sign-in")),
            ]),
        ]);
        let expr = pred.to_expr();
        assert!(expr.contains(r#"(!vis(".otp-dialog")) && "#));
        assert!(expr.contains(r##"(vis("#account-menu")) || (!(vis("a.sign-in")))"##));
    }

    #[test]
    fn selectors_with_quotes_are_escaped() {
        let pred = Predicate::visible(r#"input[name="q"]"#);
        let expr = pred.to_expr();
        assert!(expr.contains(r#"vis("input[name=\"q\"]")"#));
    }

    #[test]
    fn label_match_embeds_pattern_literal() {
        let pred = Predicate::label_match("h2", "verification code");
        assert_eq!(pred.to_expr(), r#"label("h2", "verification code")"#);
    }

    #[test]
    fn attr_match_compiles_an_attribute_probe() {
        let pred = Predicate::AttrMatch {
            selector: "input".to_string(),
            attribute: "aria-invalid".to_string(),
            pattern: "true".to_string(),
        };
        assert_eq!(pred.to_expr(), r#"attr("input", "aria-invalid", "true")"#);
    }
}
