use serde::Serializer;

/// Convert a wire integer into its real value.
#[must_use]
pub fn unscale(raw: i64) -> f64 {
    raw as f64 / crate::WIRE_SCALE
}

/// Convert a real value back into the integer sent on the wire.
#[must_use]
pub fn scale(value: f64) -> i64 {
    (value * crate::WIRE_SCALE).round() as i64
}

pub fn truncate_float<S>(float: &f64, serializer: S) -> Result<S::Ok, S::Error>
    where S: Serializer
{
    serializer.serialize_str(&format!("{float:.3}"))
}
