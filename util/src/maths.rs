//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Return the euclidian norm (distance between) of two points.
///
/// If the points do not have the same number of dimentions then `None` is 
/// returned.
pub fn norm<T>(point_0: &[T], point_1: &[T]) -> Option<T> 
where
    T: Float
{
    if point_0.len() != point_1.len() {
        return None;
    }

    let sum = point_0
        .iter()
        .zip(point_1.iter())
        .fold(T::zero(), |acc, (a, b)| acc + (*a - *b).powi(2));

    Some(sum.sqrt())
}

/// Limit `value` to the range `[min, max]`.
///
/// Returns the limited value and `true` if the limit was applied. NaN is passed through
/// unlimited, callers that care must check for it first.
pub fn clamp<T>(value: T, min: T, max: T) -> (T, bool)
where
    T: Float
{
    if value > max {
        (max, true)
    }
    else if value < min {
        (min, true)
    }
    else {
        (value, false)
    }
}

/// Sign preserving saturation of `value` to `[-limit, limit]`.
pub fn saturate<T>(value: T, limit: T) -> T
where
    T: Float
{
    if value.abs() >= limit {
        if value.is_sign_negative() { -limit } else { limit }
    }
    else {
        value
    }
}
