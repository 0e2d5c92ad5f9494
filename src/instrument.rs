//! Call-site instrumentation.
//!
//! Wrapping a function in [`instrument`] (or a type implementing [`Step`])
//! times every call as a child step of whatever timer is active on the
//! current thread. Without an installed context the wrapped code runs
//! unchanged and no name is built.

use std::any;

use crate::context;

/// Wraps `inner` so each call is recorded as a step called `name`.
pub fn instrument<F>(name: impl Into<String>, inner: F) -> Instrumented<F> {
    Instrumented {
        name: name.into(),
        inner,
    }
}

/// Like [`instrument`], but the step name is computed from the call's
/// arguments by `namer`.
pub fn instrument_with<F, N>(inner: F, namer: N) -> InstrumentedWith<F, N> {
    InstrumentedWith { inner, namer }
}

/// Function wrapped with a fixed step name.
#[derive(Debug, Clone)]
pub struct Instrumented<F> {
    name: String,
    inner: F,
}

impl<F> Instrumented<F> {
    /// Step name recorded for each call.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Calls the wrapped function inside a step.
    pub fn call<A, R>(&self, args: A) -> R
    where
        F: Fn(A) -> R,
    {
        if !context::is_active() {
            return (self.inner)(args);
        }
        context::step(self.name.as_str(), || (self.inner)(args))
    }

    /// Like [`call`](Self::call) for `FnMut` functions.
    pub fn call_mut<A, R>(&mut self, args: A) -> R
    where
        F: FnMut(A) -> R,
    {
        if !context::is_active() {
            return (self.inner)(args);
        }
        let inner = &mut self.inner;
        context::step(self.name.as_str(), || inner(args))
    }

    /// Unwraps the function.
    pub fn into_inner(self) -> F {
        self.inner
    }
}

/// Function wrapped with a per-call step name.
#[derive(Debug, Clone)]
pub struct InstrumentedWith<F, N> {
    inner: F,
    namer: N,
}

impl<F, N> InstrumentedWith<F, N> {
    /// Names the step from `args`, then calls the wrapped function inside it.
    pub fn call<A, R>(&self, args: A) -> R
    where
        F: Fn(A) -> R,
        N: Fn(&A) -> String,
    {
        if !context::is_active() {
            return (self.inner)(args);
        }
        let name = (self.namer)(&args);
        context::step(name, || (self.inner)(args))
    }

    /// Unwraps the function.
    pub fn into_inner(self) -> F {
        self.inner
    }
}

/// Types whose methods are timed as `"<label> <method>"`.
pub trait Step {
    /// Defaults to the unqualified type name.
    fn step_label(&self) -> String {
        let full = any::type_name::<Self>();
        let base = full.split('<').next().unwrap_or(full);
        base.rsplit("::").next().unwrap_or(base).to_owned()
    }

    /// Runs `body` as a step named after this value and `method`.
    fn timed<R>(&self, method: &str, body: impl FnOnce(&Self) -> R) -> R {
        if !context::is_active() {
            return body(self);
        }
        let name = format!("{} {method}", self.step_label());
        context::step(name, || body(self))
    }

    /// Mutable counterpart of [`timed`](Self::timed).
    fn timed_mut<R>(&mut self, method: &str, body: impl FnOnce(&mut Self) -> R) -> R {
        if !context::is_active() {
            return body(self);
        }
        let name = format!("{} {method}", self.step_label());
        context::step(name, || body(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProfilingContext;
    use crate::timing::Trace;

    fn install() {
        let trace = Trace::create("/", "GET http://localhost:80/", "localhost");
        context::begin(ProfilingContext::begin(trace)).unwrap();
    }

    fn child_names() -> Vec<String> {
        let ctx = context::end().unwrap();
        let trace = ctx.into_trace();
        trace
            .root()
            .children()
            .iter()
            .map(|i| trace.node(*i).unwrap().name().to_owned())
            .collect()
    }

    struct OrderRepository {
        rows: Vec<u32>,
    }

    impl Step for OrderRepository {}

    impl OrderRepository {
        fn count(&self) -> usize {
            self.timed("count", |repo| repo.rows.len())
        }

        fn push(&mut self, row: u32) {
            self.timed_mut("push", |repo| repo.rows.push(row));
        }
    }

    struct Renamed;

    impl Step for Renamed {
        fn step_label(&self) -> String {
            "Cache".into()
        }
    }

    #[test]
    fn instrumented_function_records_step() {
        install();
        let double = instrument("double", |x: u32| x * 2);
        assert_eq!(double.call(21), 42);
        assert_eq!(double.call(1), 2);
        assert_eq!(child_names(), vec!["double", "double"]);
    }

    #[test]
    fn instrumented_without_context_is_passthrough() {
        let mut total = 0;
        let mut add = instrument("add", |x: u32| {
            total += x;
            total
        });
        assert_eq!(add.call_mut(3), 3);
        assert_eq!(add.call_mut(4), 7);
        assert_eq!(add.name(), "add");
    }

    #[test]
    fn namer_sees_arguments() {
        install();
        let render = instrument_with(
            |(template, _locals): (&str, usize)| template.len(),
            |(template, _): &(&str, usize)| format!("Rendering: {template}"),
        );
        assert_eq!(render.call(("orders/index", 3)), 12);
        assert_eq!(child_names(), vec!["Rendering: orders/index"]);
    }

    #[test]
    fn trait_methods_are_named_after_type() {
        install();
        let mut repo = OrderRepository { rows: vec![1, 2] };
        repo.push(3);
        assert_eq!(repo.count(), 3);
        Renamed.timed("get", |_| ());
        assert_eq!(
            child_names(),
            vec!["OrderRepository push", "OrderRepository count", "Cache get"]
        );
    }
}
