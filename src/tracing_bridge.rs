//! Bridge from `tracing` spans to Micromegas thread-local spans.
//!
//! Bevy (with the `trace` feature) emits `tracing` spans for every schedule
//! run, and the enemy AI opens an `agent_tick` span around each controller
//! tick. This layer forwards both kinds as Micromegas named-scope events,
//! labelled by their `name` field. Every other span is ignored.

use micromegas_tracing::dispatch::{on_begin_named_scope, on_end_named_scope};
use micromegas_tracing::intern_string::intern_string;
use tracing::Subscriber;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

// All bridged spans share a single static source location.
micromegas_tracing::static_span_location!(BRIDGE_LOCATION);

/// Span names forwarded to Micromegas.
pub const BRIDGED_SPANS: [&str; 2] = ["schedule", "agent_tick"];

/// Data stored in each bridged span's extensions.
struct BridgedSpanData {
    name: &'static str,
}

/// Field visitor that extracts the `name` field from a tracing span.
struct NameVisitor {
    name: Option<String>,
}

impl NameVisitor {
    fn new() -> Self {
        Self { name: None }
    }
}

impl Visit for NameVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "name" {
            self.name = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "name" {
            self.name = Some(format!("{:?}", value));
        }
    }
}

/// `agent_tick` spans are prefixed so they group apart from schedules.
fn scope_label(span_name: &str, field: Option<String>) -> String {
    let field = field.unwrap_or_default();
    if span_name == "schedule" {
        field
    } else {
        format!("{span_name}::{field}")
    }
}

/// A `tracing_subscriber::Layer` that bridges schedule and agent spans into
/// Micromegas thread-local named-scope events.
pub struct MicromegasBridgeLayer;

impl<S> Layer<S> for MicromegasBridgeLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let span_name = attrs.metadata().name();
        if !BRIDGED_SPANS.contains(&span_name) {
            return;
        }

        let mut visitor = NameVisitor::new();
        attrs.record(&mut visitor);

        let interned = intern_string(&scope_label(span_name, visitor.name));

        if let Some(span) = ctx.span(id) {
            span.extensions_mut()
                .insert(BridgedSpanData { name: interned });
        }
    }

    fn on_enter(&self, id: &Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            let extensions = span.extensions();
            if let Some(data) = extensions.get::<BridgedSpanData>() {
                on_begin_named_scope(&BRIDGE_LOCATION, data.name);
            }
        }
    }

    fn on_exit(&self, id: &Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            let extensions = span.extensions();
            if let Some(data) = extensions.get::<BridgedSpanData>() {
                on_end_named_scope(&BRIDGE_LOCATION, data.name);
            }
        }
    }
}
