/// Returns true when the half-open intervals `[a_start, a_end)` and `[b_start, b_end)` intersect.
///
/// Touching endpoints (`a_end == b_start`) do not overlap.
pub fn overlaps<T: PartialOrd>(a_start: T, a_end: T, b_start: T, b_end: T) -> bool {
    a_start < b_end && b_start < a_end
}
