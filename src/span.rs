//! Span Resolver
//!
//! Pairs the `init` and `finish` state rows of one operation into a [`Span`].
//!
//! ```text
//! entity_states (opid = 100)        Span
//! ├─ id 11  init    time 1000  ──►  start = 1000
//! └─ id 57  finish  time 1050  ──►  end   = 1050, duration = 50 us
//! ```
//!
//! If several rows carry the same state the last one (by row id) wins.
//! Operations without both states resolve to [`Resolution::Incomplete`];
//! a finish earlier than the init is reported as an inverted span. Neither is
//! ever turned into a duration.

use crate::diagnostics::{Diagnostic, Diagnostics, Missing};
use crate::event::{OpId, StateEvent, StateType, Timestamp};
use crate::store::{EventStore, StoreResult};
use serde::Serialize;

/// Resolved lifetime of one operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Span {
    pub opid: OpId,
    pub fn_tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sm_tag: Option<String>,
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Span {
    /// Duration in microseconds, never negative
    pub fn duration(&self) -> i64 {
        self.end.saturating_sub(self.start)
    }
}

/// Outcome of resolving one opid
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Complete(Span),
    Incomplete(Diagnostic),
}

impl Resolution {
    /// Keep the span, or record why there is none
    pub fn into_span(self, diagnostics: &mut Diagnostics) -> Option<Span> {
        match self {
            Resolution::Complete(span) => Some(span),
            Resolution::Incomplete(diagnostic) => {
                diagnostics.report(diagnostic);
                None
            }
        }
    }

    pub fn span(&self) -> Option<&Span> {
        match self {
            Resolution::Complete(span) => Some(span),
            Resolution::Incomplete(_) => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Resolution::Complete(_))
    }
}

/// Resolve `opid` from rows the caller already holds
///
/// Rows for other opids are ignored, so a batch fetched by fn_tag can be
/// passed as is.
pub fn resolve_events(opid: OpId, states: &[StateEvent]) -> Resolution {
    let mut start = None;
    let mut end = None;
    let mut fn_tag = None;
    let mut sm_tag = None;

    for state in states.iter().filter(|s| s.opid == opid) {
        match state.state_type {
            StateType::Init => start = Some(state.time),
            StateType::Finish => end = Some(state.time),
        }
        fn_tag = Some(&state.fn_tag);
        if state.sm_tag.is_some() {
            sm_tag = state.sm_tag.as_ref();
        }
    }

    match (start, end) {
        (Some(start), Some(end)) if end < start => {
            Resolution::Incomplete(Diagnostic::InvertedSpan { opid, start, end })
        }
        (Some(start), Some(end)) => Resolution::Complete(Span {
            opid,
            fn_tag: fn_tag.cloned().unwrap_or_default(),
            sm_tag: sm_tag.cloned(),
            start,
            end,
        }),
        (None, Some(_)) => Resolution::Incomplete(Diagnostic::IncompleteSpan {
            opid,
            missing: Missing::Init,
        }),
        (Some(_), None) => Resolution::Incomplete(Diagnostic::IncompleteSpan {
            opid,
            missing: Missing::Finish,
        }),
        (None, None) => Resolution::Incomplete(Diagnostic::IncompleteSpan {
            opid,
            missing: Missing::Both,
        }),
    }
}

/// Resolve `opid` with one store round trip
pub fn resolve<S: EventStore + ?Sized>(store: &S, opid: OpId) -> StoreResult<Resolution> {
    let states = store.states_by_opid(opid)?;
    Ok(resolve_events(opid, &states))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn state(id: i64, opid: OpId, time: Timestamp, state_type: StateType) -> StateEvent {
        StateEvent {
            id,
            pid: 1,
            time,
            module: "cfs".to_string(),
            fn_tag: "cfs_read".to_string(),
            sm_tag: Some("CFS".to_string()),
            entity_type: "state".to_string(),
            opid,
            state_type,
        }
    }

    #[test]
    fn test_resolve_complete() {
        let states = vec![
            state(1, 100, 0, StateType::Init),
            state(2, 100, 50, StateType::Finish),
        ];
        let res = resolve_events(100, &states);
        let span = res.span().unwrap();
        assert_eq!(span.start, 0);
        assert_eq!(span.end, 50);
        assert_eq!(span.duration(), 50);
        assert_eq!(span.fn_tag, "cfs_read");
        assert_eq!(span.sm_tag.as_deref(), Some("CFS"));
    }

    #[test]
    fn test_resolve_last_write_wins() {
        let states = vec![
            state(1, 7, 10, StateType::Init),
            state(2, 7, 20, StateType::Init),
            state(3, 7, 30, StateType::Finish),
            state(4, 7, 45, StateType::Finish),
        ];
        let span = resolve_events(7, &states).span().cloned().unwrap();
        assert_eq!((span.start, span.end), (20, 45));
    }

    #[test]
    fn test_resolve_missing_finish() {
        let states = vec![state(1, 102, 5, StateType::Init)];
        assert_eq!(
            resolve_events(102, &states),
            Resolution::Incomplete(Diagnostic::IncompleteSpan {
                opid: 102,
                missing: Missing::Finish
            })
        );
    }

    #[test]
    fn test_resolve_missing_init() {
        let states = vec![state(1, 102, 5, StateType::Finish)];
        assert_eq!(
            resolve_events(102, &states),
            Resolution::Incomplete(Diagnostic::IncompleteSpan {
                opid: 102,
                missing: Missing::Init
            })
        );
    }

    #[test]
    fn test_resolve_no_rows() {
        assert_eq!(
            resolve_events(1, &[]),
            Resolution::Incomplete(Diagnostic::IncompleteSpan {
                opid: 1,
                missing: Missing::Both
            })
        );
    }

    #[test]
    fn test_resolve_inverted_is_reported_not_negated() {
        let states = vec![
            state(1, 3, 90, StateType::Init),
            state(2, 3, 40, StateType::Finish),
        ];
        assert_eq!(
            resolve_events(3, &states),
            Resolution::Incomplete(Diagnostic::InvertedSpan {
                opid: 3,
                start: 90,
                end: 40
            })
        );
    }

    #[test]
    fn test_resolve_ignores_other_opids() {
        let states = vec![
            state(1, 1, 0, StateType::Init),
            state(2, 2, 3, StateType::Init),
            state(3, 2, 9, StateType::Finish),
        ];
        assert!(!resolve_events(1, &states).is_complete());
        assert_eq!(resolve_events(2, &states).span().unwrap().duration(), 6);
    }

    #[test]
    fn test_duration_saturates_on_extreme_timestamps() {
        let states = vec![
            state(1, 5, i64::MIN, StateType::Init),
            state(2, 5, i64::MAX, StateType::Finish),
        ];
        assert_eq!(resolve_events(5, &states).span().unwrap().duration(), i64::MAX);
    }

    #[test]
    fn test_into_span_records_diagnostic() {
        let mut diags = Diagnostics::new();
        assert!(resolve_events(9, &[]).into_span(&mut diags).is_none());
        assert!(diags.mentions(9));
    }

    #[test]
    fn test_resolve_through_store() {
        let mut store = MemoryStore::new();
        store.push_state(state(1, 100, 0, StateType::Init));
        store.push_state(state(2, 100, 50, StateType::Finish));
        let res = resolve(&store, 100).unwrap();
        assert_eq!(res.span().unwrap().duration(), 50);
    }
}
