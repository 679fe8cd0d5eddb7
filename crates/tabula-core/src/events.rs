//! Change notifications for column observers.
//!
//! Every mutation is bracketed by an "about to" event (old state still readable) and a
//! completion event (new state visible). Listeners run synchronously, in registration order,
//! and receive the column itself so they can read whichever state the phase exposes.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::column::Column;

/// Events emitted by a [`Column`] around its mutations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnEvent {
    NameAboutToChange,
    NameChanged,
    PlotDesignationAboutToChange,
    PlotDesignationChanged,
    ModeAboutToChange,
    ModeChanged,
    DataAboutToChange,
    DataChanged,
    RowsAboutToBeInserted { before: usize, count: usize },
    RowsInserted { before: usize, count: usize },
    RowsAboutToBeRemoved { first: usize, count: usize },
    RowsRemoved { first: usize, count: usize },
    MaskingAboutToChange,
    MaskingChanged,
    FormulaAboutToChange,
    FormulaChanged,
    /// The only teardown signal; observers must detach when they see it
    AboutToBeDestroyed,
}

/// Payload-free discriminant of a [`ColumnEvent`], used to filter subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    NameAboutToChange,
    NameChanged,
    PlotDesignationAboutToChange,
    PlotDesignationChanged,
    ModeAboutToChange,
    ModeChanged,
    DataAboutToChange,
    DataChanged,
    RowsAboutToBeInserted,
    RowsInserted,
    RowsAboutToBeRemoved,
    RowsRemoved,
    MaskingAboutToChange,
    MaskingChanged,
    FormulaAboutToChange,
    FormulaChanged,
    AboutToBeDestroyed,
}

impl ColumnEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ColumnEvent::NameAboutToChange => EventKind::NameAboutToChange,
            ColumnEvent::NameChanged => EventKind::NameChanged,
            ColumnEvent::PlotDesignationAboutToChange => EventKind::PlotDesignationAboutToChange,
            ColumnEvent::PlotDesignationChanged => EventKind::PlotDesignationChanged,
            ColumnEvent::ModeAboutToChange => EventKind::ModeAboutToChange,
            ColumnEvent::ModeChanged => EventKind::ModeChanged,
            ColumnEvent::DataAboutToChange => EventKind::DataAboutToChange,
            ColumnEvent::DataChanged => EventKind::DataChanged,
            ColumnEvent::RowsAboutToBeInserted { .. } => EventKind::RowsAboutToBeInserted,
            ColumnEvent::RowsInserted { .. } => EventKind::RowsInserted,
            ColumnEvent::RowsAboutToBeRemoved { .. } => EventKind::RowsAboutToBeRemoved,
            ColumnEvent::RowsRemoved { .. } => EventKind::RowsRemoved,
            ColumnEvent::MaskingAboutToChange => EventKind::MaskingAboutToChange,
            ColumnEvent::MaskingChanged => EventKind::MaskingChanged,
            ColumnEvent::FormulaAboutToChange => EventKind::FormulaAboutToChange,
            ColumnEvent::FormulaChanged => EventKind::FormulaChanged,
            ColumnEvent::AboutToBeDestroyed => EventKind::AboutToBeDestroyed,
        }
    }

    /// True for the completion events that change what a value reader would see
    pub fn changes_values(&self) -> bool {
        matches!(
            self,
            ColumnEvent::DataChanged
                | ColumnEvent::ModeChanged
                | ColumnEvent::RowsInserted { .. }
                | ColumnEvent::RowsRemoved { .. }
                | ColumnEvent::MaskingChanged
        )
    }
}

/// Handle returned by a subscription, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Callback type for receiving column events
pub type ColumnListener = Box<dyn FnMut(&Column, &ColumnEvent) + Send>;

struct Subscription {
    id: ListenerId,
    kind: Option<EventKind>,
    callback: ColumnListener,
}

/// Ordered listener registry owned by a column
#[derive(Default)]
pub struct Listeners {
    subscriptions: Vec<Subscription>,
    next_id: u64,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, kind: Option<EventKind>, callback: ColumnListener) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.subscriptions.push(Subscription { id, kind, callback });
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        self.subscriptions.len() != before
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn clear(&mut self) {
        self.subscriptions.clear();
    }

    /// Invoke every matching listener in registration order
    pub fn dispatch(&mut self, column: &Column, event: &ColumnEvent) {
        let kind = event.kind();
        for sub in self.subscriptions.iter_mut() {
            if sub.kind.map_or(true, |k| k == kind) {
                tracing::trace!(column = %column.name(), listener = %sub.id, ?event, "dispatch");
                (sub.callback)(column, event);
            }
        }
    }
}

/// Cloned columns start without observers; subscriptions belong to one instance
impl Clone for Listeners {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.subscriptions.len())
            .finish()
    }
}

/// Simple event collector for tests and diagnostics
#[derive(Debug, Default, Clone)]
pub struct EventLog {
    events: std::sync::Arc<std::sync::Mutex<Vec<ColumnEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A listener that appends every event to this log
    pub fn listener(&self) -> ColumnListener {
        let events = self.events.clone();
        Box::new(move |_, event| {
            events
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(*event);
        })
    }

    pub fn events(&self) -> Vec<ColumnEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}
