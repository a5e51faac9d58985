#![allow(unused)]

use crate::task::Id;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Method {
    Spawn,
    Schedule,
    Resume,
    AdapterArmed,
    AdapterInvoked,
    Cleanup,
    Destroy,
    Post,
    Dispatch,
}

impl Method {
    const ALL: [Method; 9] = [
        Method::Spawn,
        Method::Schedule,
        Method::Resume,
        Method::AdapterArmed,
        Method::AdapterInvoked,
        Method::Cleanup,
        Method::Destroy,
        Method::Post,
        Method::Dispatch,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Spawn { id: Id },
    Schedule { id: Id },
    Resume { id: Id },
    AdapterArmed { id: Id },
    AdapterInvoked { id: Id },
    Cleanup { id: Id },
    Destroy { id: Id },
    Post,
    Dispatch { inline: bool },
}

/// Records what the bridge asked of an executor, so tests can assert on
/// scheduling decisions and not only on outcomes.
#[derive(Debug, Clone)]
pub(crate) struct Tracker {
    calls: Arc<DashMap<Method, Vec<Call>>>,
}

impl Tracker {
    pub(crate) fn new() -> Self {
        let map = DashMap::new();
        for method in Method::ALL {
            map.insert(method, Vec::new());
        }

        Self {
            calls: Arc::new(map),
        }
    }

    pub(crate) fn record(&self, method: Method, call: Call) {
        if let Some(mut calls) = self.calls.get_mut(&method) {
            calls.push(call);
        }
    }

    pub(crate) fn get_calls(&self, method: &Method) -> Vec<Call> {
        self.calls
            .get(method)
            .map(|calls| calls.value().clone())
            .unwrap_or_default()
    }

    pub(crate) fn num_calls(&self, method: &Method) -> usize {
        self.calls.get(method).map_or(0, |calls| calls.len())
    }

    /// Calls of `method` that concern task `id`.
    pub(crate) fn num_calls_for(&self, method: &Method, id: Id) -> usize {
        self.get_calls(method)
            .iter()
            .filter(|call| call.task_id() == Some(id))
            .count()
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Call {
    pub(crate) fn task_id(&self) -> Option<Id> {
        match self {
            Call::Spawn { id }
            | Call::Schedule { id }
            | Call::Resume { id }
            | Call::AdapterArmed { id }
            | Call::AdapterInvoked { id }
            | Call::Cleanup { id }
            | Call::Destroy { id } => Some(*id),
            Call::Post | Call::Dispatch { .. } => None,
        }
    }
}
