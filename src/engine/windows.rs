use crate::model::{Ms, RoomSchedule, Span};

// ── Free-window algorithm ────────────────────────────────────────

/// Compute the maximal free sub-spans of `query` for a room: the query window
/// minus every blocking entry (confirmed reservations and unlapsed holds),
/// merged and subtracted as sorted disjoint interval sets.
pub fn free_windows(room: &RoomSchedule, query: &Span, now: Ms) -> Vec<Span> {
    let mut busy: Vec<Span> = room
        .overlapping(query)
        .filter(|e| e.blocks_at(now))
        .map(|e| e.span.clamp_to(query))
        .collect();

    if busy.is_empty() {
        return vec![*query];
    }

    busy.sort_by_key(|s| s.start);
    let busy = merge_overlapping(&busy);
    subtract_intervals(&[*query], &busy)
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Subtract a sorted disjoint set of intervals from a sorted disjoint base set.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}
