//! Script runtime (spec §4.6): compile once, execute on cadence, duration
//! metric. Per SPEC_FULL's re-architecture note, arbitrary source-text
//! execution becomes a restricted expression DSL evaluated by an embedded
//! `rhai` interpreter rather than `eval`-ing host-language text.
//!
//! Scripts never hold `&mut Snapshot` directly, preserving the single-writer
//! rule: `get(name)` reads from a cheap immutable copy of the current
//! snapshot taken before the script runs, and `set(name, value, status)`
//! queues a `TagValue` that the scan loop applies through `Snapshot::set`
//! after the script returns, closing over a channel the way SPEC_FULL
//! describes.

use crate::metrics::{Metric, MetricName, MetricsHandle};
use crate::model::{TagData, TagValue};
use rhai::{Dynamic, Engine, Scope, AST};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Read-only view of current tag values a script's `get()` calls resolve
/// against. Built by the scan loop once per cycle, before any script runs.
pub type SnapshotView = HashMap<String, TagValue>;

/// A compiled, cadence-gated script (spec §3 "Script").
pub struct Script {
    pub name: String,
    pub cycle: Duration,
    pub is_active: bool,
    pub last_run: Option<Instant>,
    body: String,
    ast: Option<AST>,
}

impl Script {
    /// Construction requires a non-empty body. If `is_active`, compile the
    /// body once; on compile failure, mark inactive and log (spec §4.6) —
    /// never a hard construction error, since a broken script should not
    /// block the rest of config load.
    pub fn new(name: impl Into<String>, cycle: Duration, is_active: bool, body: impl Into<String>) -> anyhow::Result<Self> {
        let name = name.into();
        let body = body.into();
        if body.trim().is_empty() {
            return Err(anyhow::anyhow!("script {name} has an empty body"));
        }

        let mut script = Self {
            name,
            cycle,
            is_active,
            last_run: None,
            body,
            ast: None,
        };

        if script.is_active {
            script.compile();
        }

        Ok(script)
    }

    fn compile(&mut self) {
        let engine = Engine::new();
        match engine.compile(&self.body) {
            Ok(ast) => self.ast = Some(ast),
            Err(e) => {
                tracing::error!(script = %self.name, "compile failed, deactivating: {e}");
                self.is_active = false;
                self.ast = None;
            }
        }
    }

    /// Run the script if due: `is_active` and `now - last_run > cycle`.
    /// Returns the `TagValue`s the script wants written, for the scan loop
    /// to apply. A script body failure is caught and logged; the script
    /// stays active for the next tick (spec §4.6).
    pub fn run(&mut self, view: &SnapshotView, metrics: &MetricsHandle) -> Vec<TagValue> {
        if !self.is_active {
            return Vec::new();
        }
        let due = match self.last_run {
            None => true,
            Some(t) => t.elapsed() > self.cycle,
        };
        if !due {
            return Vec::new();
        }
        self.last_run = Some(Instant::now());

        let Some(ast) = self.ast.clone() else {
            return Vec::new();
        };

        let start = Instant::now();
        let pending: Rc<RefCell<Vec<TagValue>>> = Rc::new(RefCell::new(Vec::new()));

        let mut engine = Engine::new();
        let get_view = view.clone();
        engine.register_fn("get", move |name: &str| -> Dynamic { lookup(&get_view, name) });

        let set_pending = pending.clone();
        engine.register_fn("set", move |name: &str, value: Dynamic, status: i64| {
            if let Some(v) = to_tag_value(name, value, status as i32) {
                set_pending.borrow_mut().push(v);
            }
        });
        // Two-arg form defaults status to 0 (ok).
        let set_pending_default = pending.clone();
        engine.register_fn("set", move |name: &str, value: Dynamic| {
            if let Some(v) = to_tag_value(name, value, 0) {
                set_pending_default.borrow_mut().push(v);
            }
        });

        let mut scope = Scope::new();
        let status = match engine.run_ast_with_scope(&mut scope, &ast) {
            Ok(()) => "ok",
            Err(e) => {
                tracing::warn!(script = %self.name, "script body failed: {e}");
                "error"
            }
        };

        metrics.record(Metric {
            name: MetricName::ScriptDuration,
            value: start.elapsed().as_secs_f64(),
            labels: vec![("script", self.name.clone()), ("status", status.to_string())],
        });

        Rc::try_unwrap(pending)
            .map(RefCell::into_inner)
            .unwrap_or_default()
    }
}

/// Project a `TagValue` into the `Dynamic` a script's `get()` call sees.
fn lookup(view: &SnapshotView, name: &str) -> Dynamic {
    match view.get(name).map(|v| &v.value) {
        Some(TagData::Bool(b)) => Dynamic::from(*b),
        Some(TagData::Int(i)) => Dynamic::from(*i),
        Some(TagData::Float(f)) => Dynamic::from(*f),
        Some(TagData::Array(values)) => {
            Dynamic::from(values.iter().map(|v| Dynamic::from(*v)).collect::<Vec<_>>())
        }
        None => Dynamic::UNIT,
    }
}

/// Convert a script's `set()` argument back into a `TagValue`, inferring
/// the tag type from the `Dynamic`'s runtime type.
fn to_tag_value(name: &str, value: Dynamic, status: i32) -> Option<TagValue> {
    let data = if let Some(b) = value.clone().try_cast::<bool>() {
        TagData::Bool(b)
    } else if let Some(i) = value.clone().try_cast::<i64>() {
        TagData::Int(i)
    } else if let Some(f) = value.clone().try_cast::<f64>() {
        TagData::Float(f)
    } else if let Some(arr) = value.clone().try_cast::<rhai::Array>() {
        TagData::Array(arr.into_iter().filter_map(|d| d.try_cast::<f64>()).collect())
    } else {
        tracing::warn!(tag = name, "script set() with unsupported value type, dropping");
        return None;
    };
    Some(TagValue::new(name, data, status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsSink;

    #[test]
    fn empty_body_is_construction_error() {
        assert!(Script::new("s1", Duration::from_secs(1), true, "   ").is_err());
    }

    #[test]
    fn bad_syntax_deactivates_and_logs() {
        let script = Script::new("s1", Duration::from_secs(1), true, "this is not rhai (((").unwrap();
        assert!(!script.is_active);
    }

    #[test]
    fn run_executes_only_when_due_and_applies_cycle_gate() {
        let (sink, metrics) = MetricsSink::new(16).unwrap();
        let _sink = sink;
        let mut script = Script::new("s1", Duration::from_millis(50), true, "set(\"out\", 1);").unwrap();

        let view = SnapshotView::new();
        let first = script.run(&view, &metrics);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].name, "out");

        // Immediately due again? No: last_run was just set.
        let second = script.run(&view, &metrics);
        assert!(second.is_empty());
    }

    #[test]
    fn get_reads_from_the_snapshot_view() {
        let (sink, metrics) = MetricsSink::new(16).unwrap();
        let _sink = sink;
        let mut script = Script::new(
            "s1",
            Duration::from_millis(1),
            true,
            "let x = get(\"in\"); set(\"out\", x * 2.0);",
        )
        .unwrap();

        let mut view = SnapshotView::new();
        view.insert("in".to_string(), TagValue::new("in", TagData::Float(3.0), 0));

        let pending = script.run(&view, &metrics);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].value, TagData::Float(6.0));
    }

    #[test]
    fn body_failure_keeps_script_active() {
        let (sink, metrics) = MetricsSink::new(16).unwrap();
        let _sink = sink;
        let mut script = Script::new(
            "s1",
            Duration::from_millis(1),
            true,
            "let x = get(\"missing\"); set(\"out\", x + 1);",
        )
        .unwrap();
        let view = SnapshotView::new();
        let _ = script.run(&view, &metrics);
        assert!(script.is_active);
    }
}
