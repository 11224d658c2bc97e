//! Helper macros enforcing consistent reconcile log fields.
//!
//! These macros keep `kind` (and optionally `pipeline`) fields present on every log
//! emitted from the reconcile loops so downstream parsing can rely on them.

/// Log an event for a pipeline kind (and optionally one pipeline) plus any extra fields.
#[macro_export]
macro_rules! kind_event {
    ($level:ident, $target:expr, $event:expr, kind = $kind:expr, pipeline = $pipeline:expr $(, $field:ident = $value:expr )* $(,)?) => {
        tracing::$level!(
            target = $target,
            event = $event,
            kind = %$kind,
            pipeline = %$pipeline,
            $($field = %$value,)*
        )
    };
    ($level:ident, $target:expr, $event:expr, kind = $kind:expr $(, $field:ident = $value:expr )* $(,)?) => {
        tracing::$level!(
            target = $target,
            event = $event,
            kind = %$kind,
            $($field = %$value,)*
        )
    };
}
