// SPDX-License-Identifier: BSD-3-Clause
//! Tracing layer summing up the time spent in each kind of span.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{Id, Subscriber};
use tracing_subscriber::{layer::Context, registry::LookupSpan, Layer};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SpanTotal {
    pub entered: u64,
    pub busy: Duration,
}

/// Shared view of the totals collected by a [`SpanTimeLayer`].
#[derive(Clone, Debug, Default)]
pub struct SpanTotals(Arc<Mutex<BTreeMap<&'static str, SpanTotal>>>);

impl SpanTotals {
    pub fn get(&self, name: &str) -> Option<SpanTotal> {
        self.0.lock().ok()?.get(name).copied()
    }

    pub fn snapshot(&self) -> BTreeMap<&'static str, SpanTotal> {
        self.0.lock().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn print(&self, out: &mut impl Write) -> io::Result<()> {
        for (name, total) in self.snapshot() {
            writeln!(
                out,
                "span {}: {} entered, {:.3}s",
                name,
                total.entered,
                total.busy.as_secs_f64()
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct SpanTimeLayer {
    totals: SpanTotals,
}

impl SpanTimeLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn totals(&self) -> SpanTotals {
        self.totals.clone()
    }
}

struct Entered(Instant);

impl<S> Layer<S> for SpanTimeLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_enter(&self, id: &Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().replace(Entered(Instant::now()));
        }
    }

    fn on_exit(&self, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let Some(Entered(start)) = span.extensions_mut().remove::<Entered>() else {
            return;
        };
        if let Ok(mut totals) = self.totals.0.lock() {
            let total = totals.entry(span.name()).or_default();
            total.entered += 1;
            total.busy += start.elapsed();
        }
    }
}
