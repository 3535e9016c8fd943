//! Best-effort inline-script execution for hybrid fetches.
//!
//! Inline `<script>` bodies run in an embedded ECMAScript interpreter
//! with stub `window`/`document`/`console` globals, no network, and no
//! real DOM. Scripts that throw are skipped. Top-level primitive globals
//! the scripts create are exported into page metadata under `js:` keys.
//! This recovers data-assignment scripts, not framework rendering.

use boa_engine::{Context, Source};
use log::debug;
use std::collections::HashMap;
use std::time::Duration;

use crate::errors::EngineResult;
use crate::extract;
use crate::models::{PageData, RequestOptions};
use crate::session::Session;

use super::StaticScraper;

/// Stub globals installed before any page script runs. Methods are
/// no-ops returning neutral values so common DOM calls do not throw.
const PRELUDE: &str = r#"
var window = this;
var self = this;
var globalThis = this;
var document = {
    getElementById: function() { return null; },
    getElementsByClassName: function() { return []; },
    getElementsByTagName: function() { return []; },
    querySelector: function() { return null; },
    querySelectorAll: function() { return []; },
    createElement: function() {
        return { setAttribute: function() {}, appendChild: function() {}, style: {} };
    },
    addEventListener: function() {},
    removeEventListener: function() {},
    write: function() {},
    cookie: ''
};
var console = {
    log: function() {}, info: function() {}, warn: function() {},
    error: function() {}, debug: function() {}
};
var navigator = { userAgent: 'webgrab-sandbox' };
var location = { href: '', host: '', pathname: '/' };
var setTimeout = function() { return 0; };
var setInterval = function() { return 0; };
var clearTimeout = function() {};
var clearInterval = function() {};
var alert = function() {};
"#;

/// Static fetch followed by the inline-script sandbox.
pub struct HybridScraper {
    statics: StaticScraper,
}

impl HybridScraper {
    pub fn new(user_agent: &str, default_timeout: Duration) -> EngineResult<Self> {
        Ok(Self {
            statics: StaticScraper::new(user_agent, default_timeout)?,
        })
    }

    /// Fetch `opts.url` over HTTP and run its inline scripts.
    pub async fn fetch(
        &self,
        opts: &RequestOptions,
        session: Option<&Session>,
    ) -> EngineResult<PageData> {
        let mut data = self.statics.fetch(opts, session).await?;
        apply_inline_scripts(&mut data);
        Ok(data)
    }
}

#[async_trait::async_trait]
impl super::Scraper for HybridScraper {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    async fn fetch(
        &self,
        opts: &RequestOptions,
        session: Option<&Session>,
    ) -> EngineResult<PageData> {
        HybridScraper::fetch(self, opts, session).await
    }
}

/// Run the page's inline scripts and merge exported globals into
/// `data.metadata` under `js:`-prefixed keys. Never fails; a page whose
/// scripts all throw simply contributes nothing.
pub fn apply_inline_scripts(data: &mut PageData) {
    for (key, value) in run_inline_scripts(&data.html) {
        data.metadata.insert(format!("js:{key}"), value);
    }
}

/// Execute inline scripts from `html` in the sandbox, returning the
/// primitive globals they created.
pub fn run_inline_scripts(html: &str) -> HashMap<String, String> {
    let scripts = match extract::inline_scripts(html) {
        Ok(scripts) => scripts,
        Err(e) => {
            debug!("could not extract inline scripts: {e}");
            return HashMap::new();
        }
    };
    if scripts.is_empty() {
        return HashMap::new();
    }

    let mut ctx = Context::default();
    if let Err(e) = ctx.eval(Source::from_bytes(PRELUDE)) {
        debug!("sandbox prelude failed: {e}");
        return HashMap::new();
    }

    // Snapshot the globals the prelude and interpreter define, so only
    // script-created names get exported.
    let baseline = match eval_string(&mut ctx, "JSON.stringify(Object.getOwnPropertyNames(this))")
    {
        Some(json) => json,
        None => {
            debug!("could not snapshot sandbox globals");
            return HashMap::new();
        }
    };

    let mut executed = 0usize;
    for (idx, script) in scripts.iter().enumerate() {
        match ctx.eval(Source::from_bytes(script.as_str())) {
            Ok(_) => executed += 1,
            Err(e) => debug!("inline script {idx} failed in sandbox: {e}"),
        }
    }
    debug!("executed {executed}/{} inline scripts", scripts.len());

    let collector = format!(
        r#"(function() {{
            var baseline = {baseline};
            var out = {{}};
            var names = Object.getOwnPropertyNames(this);
            for (var i = 0; i < names.length; i++) {{
                var k = names[i];
                if (baseline.indexOf(k) !== -1) continue;
                var v = this[k];
                var t = typeof v;
                if (t === 'string' || t === 'number' || t === 'boolean') {{
                    out[k] = String(v);
                }}
            }}
            return JSON.stringify(out);
        }}).call(this)"#
    );

    let Some(json) = eval_string(&mut ctx, &collector) else {
        debug!("could not collect sandbox globals");
        return HashMap::new();
    };
    match serde_json::from_str(&json) {
        Ok(map) => map,
        Err(e) => {
            debug!("sandbox export was not valid JSON: {e}");
            HashMap::new()
        }
    }
}

fn eval_string(ctx: &mut Context, js: &str) -> Option<String> {
    match ctx.eval(Source::from_bytes(js)) {
        Ok(value) => value.as_string().map(|s| s.to_std_string_escaped()),
        Err(e) => {
            debug!("sandbox evaluation failed: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exported_globals_get_js_prefix() {
        let html = r"<html><body>
            <script>var pageId = 42; var label = 'news'; var ready = true;</script>
        </body></html>";

        let mut data = PageData::new("https://example.com");
        data.html = html.to_string();
        apply_inline_scripts(&mut data);

        assert_eq!(data.metadata.get("js:pageId").unwrap(), "42");
        assert_eq!(data.metadata.get("js:label").unwrap(), "news");
        assert_eq!(data.metadata.get("js:ready").unwrap(), "true");
    }

    #[test]
    fn throwing_scripts_are_skipped() {
        let html = r"<html><body>
            <script>throw new Error('boom');</script>
            <script>var survivor = 'ok';</script>
        </body></html>";

        let globals = run_inline_scripts(html);
        assert_eq!(globals.get("survivor").unwrap(), "ok");
    }

    #[test]
    fn dom_calls_do_not_throw_in_sandbox() {
        let html = r"<html><body><script>
            document.addEventListener('load', function() {});
            var el = document.querySelector('#x');
            console.log('hello', el);
            var probed = el === null ? 'null' : 'found';
        </script></body></html>";

        let globals = run_inline_scripts(html);
        assert_eq!(globals.get("probed").unwrap(), "null");
    }

    #[test]
    fn prelude_and_builtin_globals_are_not_exported() {
        let html = "<html><body><script>var only = 1;</script></body></html>";
        let globals = run_inline_scripts(html);
        assert_eq!(globals.len(), 1);
        assert!(globals.contains_key("only"));
    }

    #[test]
    fn pages_without_inline_scripts_export_nothing() {
        let html = r#"<html><body><script src="/app.js"></script></body></html>"#;
        assert!(run_inline_scripts(html).is_empty());
    }

    #[test]
    fn non_primitive_globals_are_ignored() {
        let html = r"<html><body>
            <script>var obj = {a: 1}; var arr = [1,2]; var num = 7;</script>
        </body></html>";
        let globals = run_inline_scripts(html);
        assert_eq!(globals.len(), 1);
        assert_eq!(globals.get("num").unwrap(), "7");
    }
}
