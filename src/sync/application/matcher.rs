//! Full outer join of downstream records against authoritative records.

/// Pairs every element of `first` with every element of `second` it equals.
///
/// - each `(a, b)` with `equals(a, b)` is emitted, so an element matching
///   several elements on the other side fans out into several pairs;
/// - an element of `first` matching nothing is emitted as `(Some(a), None)`;
/// - an element of `second` matching nothing is emitted as `(None, Some(b))`,
///   after all pairs led by `first`.
///
/// Natural keys are expected to be unique on both sides; colliding keys are
/// not deduplicated.
pub fn full_outer_join<T, U, F>(first: Vec<T>, second: Vec<U>, equals: F) -> Vec<(Option<T>, Option<U>)>
where
    T: Clone,
    U: Clone,
    F: Fn(&T, &U) -> bool,
{
    let mut result = Vec::with_capacity(first.len().max(second.len()));
    let mut second_matched = vec![false; second.len()];

    for a in first {
        let mut first_matched = false;
        for (j, b) in second.iter().enumerate() {
            if equals(&a, b) {
                first_matched = true;
                second_matched[j] = true;
                result.push((Some(a.clone()), Some(b.clone())));
            }
        }
        if !first_matched {
            result.push((Some(a), None));
        }
    }

    result.extend(
        second
            .into_iter()
            .zip(second_matched)
            .filter(|(_, matched)| !matched)
            .map(|(b, _)| (None, Some(b))),
    );
    result
}
