//! Status line routing.
//!
//! The router looks at the leading token(s) of a status payload, finds the
//! resource type registered for them and hands the remainder to the generic
//! lifecycle engine in [`crate::model`]. Two-token resource names such as
//! `display pan` are tried before one-token names.

use std::collections::HashMap;
use std::sync::Arc;

use crate::model::{
    self, DaxAudioStream, DaxIqStream, EventSink, GuiClient, Meter, ObjectGraph, Panadapter,
    Resource, Slice,
};

type RouteFn = fn(&ObjectGraph, &EventSink, &str);

/// Dispatches status payloads to per-resource lifecycle handlers.
pub struct StatusRouter {
    graph: Arc<ObjectGraph>,
    events: EventSink,
    routes: HashMap<&'static str, RouteFn>,
}

impl StatusRouter {
    /// A router covering every built-in resource type.
    pub fn new(graph: Arc<ObjectGraph>, events: EventSink) -> Self {
        let mut router = StatusRouter {
            graph,
            events,
            routes: HashMap::new(),
        };
        router.register::<Slice>();
        router.register::<Panadapter>();
        router.register::<DaxAudioStream>();
        router.register::<DaxIqStream>();
        router.register::<Meter>();
        router.register::<GuiClient>();
        router
    }

    fn register<T: Resource>(&mut self) {
        self.routes.insert(T::TOKEN, model::apply_status::<T>);
    }

    pub fn graph(&self) -> &Arc<ObjectGraph> {
        &self.graph
    }

    /// Route one status payload (the text after `S<handle>|`). Returns
    /// `false` when no resource type claims it.
    pub fn route(&self, payload: &str) -> bool {
        let mut tokens = payload.split_whitespace();
        let Some(first) = tokens.next() else {
            return false;
        };

        if let Some(second) = tokens.next() {
            let two = format!("{first} {second}");
            if let Some(route) = self.routes.get(two.as_str()) {
                route(&self.graph, &self.events, skip_tokens(payload, 2));
                return true;
            }
        }
        if let Some(route) = self.routes.get(first) {
            route(&self.graph, &self.events, skip_tokens(payload, 1));
            return true;
        }

        tracing::debug!(resource = first, "unhandled status resource");
        false
    }
}

/// The remainder of `s` after `n` whitespace-separated tokens.
fn skip_tokens(s: &str, n: usize) -> &str {
    let mut rest = s.trim_start();
    for _ in 0..n {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        rest = rest[end..].trim_start();
    }
    rest
}
