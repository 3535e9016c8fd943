//! Strategy selection for auto-mode fetches.
//!
//! The probe looks only at the static HTML: how many scripts it carries,
//! whether a known client-side framework left its signature, and how
//! much real markup exists outside of scripts.

use scraper::{Html, Selector};

use crate::errors::{EngineError, EngineResult};

/// Which fetch path an auto-mode request should take after probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// The static fetch already produced everything.
    Static,
    /// The page needs a real browser to render.
    Dynamic,
    /// A few inline scripts worth executing in the sandbox.
    Hybrid,
}

/// Substrings that mark a client-side rendering framework.
const FRAMEWORK_SIGNATURES: &[&str] = &[
    "react",
    "vue",
    "angular",
    "ember",
    "svelte",
    "data-reactroot",
    "ng-app",
    "__next_data__",
];

/// Decide the strategy for a page from its static HTML.
pub fn determine_strategy(html: &str) -> EngineResult<Strategy> {
    let doc = Html::parse_document(html);
    let script = compile("script")?;
    let div = compile("div")?;

    let script_count = doc.select(&script).count();
    if script_count == 0 {
        return Ok(Strategy::Static);
    }

    let div_count = doc.select(&div).count();
    if needs_javascript(html, script_count, div_count) {
        return Ok(Strategy::Dynamic);
    }
    Ok(Strategy::Hybrid)
}

/// Heuristic: heavy scripting, a framework signature, or markup too
/// sparse to have been rendered server-side.
fn needs_javascript(html: &str, script_count: usize, div_count: usize) -> bool {
    if script_count > 5 {
        return true;
    }
    let lower = html.to_ascii_lowercase();
    if FRAMEWORK_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
        return true;
    }
    div_count < 3 && script_count > 0
}

fn compile(selector: &str) -> EngineResult<Selector> {
    Selector::parse(selector)
        .map_err(|e| EngineError::Parse(format!("invalid selector {selector:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_scripts_is_static() {
        let html = "<html><body><div>a</div><div>b</div><div>c</div></body></html>";
        assert_eq!(determine_strategy(html).unwrap(), Strategy::Static);
    }

    #[test]
    fn framework_signature_is_dynamic() {
        let html = r#"<html><body>
            <div id="root" data-reactroot=""></div>
            <div>x</div><div>y</div>
            <script src="/bundle.js"></script>
        </body></html>"#;
        assert_eq!(determine_strategy(html).unwrap(), Strategy::Dynamic);
    }

    #[test]
    fn many_scripts_is_dynamic() {
        let scripts = "<script>1</script>".repeat(6);
        let html = format!(
            "<html><body><div>a</div><div>b</div><div>c</div>{scripts}</body></html>"
        );
        assert_eq!(determine_strategy(&html).unwrap(), Strategy::Dynamic);
    }

    #[test]
    fn sparse_markup_with_scripts_is_dynamic() {
        let html = "<html><body><div></div><script>boot()</script></body></html>";
        assert_eq!(determine_strategy(html).unwrap(), Strategy::Dynamic);
    }

    #[test]
    fn a_couple_of_plain_scripts_is_hybrid() {
        let html = r"<html><body>
            <div>a</div><div>b</div><div>c</div><div>d</div>
            <script>var x = 1;</script>
            <script>var y = 2;</script>
        </body></html>";
        assert_eq!(determine_strategy(html).unwrap(), Strategy::Hybrid);
    }
}
