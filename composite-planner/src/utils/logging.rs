/// Emits a `tracing::trace!` event tagged with a `snapshot` name and a `data` payload, so that a
/// log viewer can replay how candidate plans change while an operation is planned. Unrelated to
/// `insta` snapshot tests.
///
/// Events only exist with the `snapshot_tracing` feature; otherwise the macro expands to nothing
/// and its arguments are not evaluated.
///
/// Given a value, the tag is the value's type name and the payload its JSON serialization:
/// ```ignore
/// snapshot!(plan_node, "expanded plan node");
/// // trace!(snapshot = "PlanNode", data = "{ .. }", "expanded plan node");
/// ```
/// Given a literal tag, the payload is passed through as is and must be a tracing `Value`:
/// ```ignore
/// snapshot!("PlanStep", step.to_string(), "emitted step");
/// // trace!(snapshot = "PlanStep", data = step.to_string(), "emitted step");
/// ```
macro_rules! snapshot {
    ($value:expr, $msg:literal) => {
        #[cfg(feature = "snapshot_tracing")]
        tracing::trace!(
            snapshot = std::any::type_name_of_val(&$value),
            data = serde_json::to_string(&$value).unwrap_or_else(|error| format!(
                "could not serialize value for a snapshot ({error}) with message: {}",
                $msg
            )),
            $msg
        );
    };
    ($name:literal, $value:expr, $msg:literal) => {
        #[cfg(feature = "snapshot_tracing")]
        tracing::trace!(snapshot = $name, data = $value, $msg);
    };
}

pub(crate) use snapshot;
