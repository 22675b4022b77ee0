use chrono::NaiveDate;

use crate::model::*;

// ── Legal windows ────────────────────────────────────────────────

/// A time range during which the room may be booked on a given date,
/// with the capacity and price override that apply inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegalWindow {
    pub window: Slot,
    pub max_concurrent: u32,
    pub price_override: Option<Cents>,
    pub from_exception: bool,
}

/// Compute the legal booking windows for `(room, date)`.
///
/// Exceptions override templates for their date:
/// - a closed exception yields no windows at all;
/// - a custom-hours exception replaces every template window with its own
///   (capacity taken as the max across the day's templates, default 1);
/// - a price-only exception leaves the template windows standing but
///   attaches its price override to each.
///
/// Otherwise every active template whose day-of-week matches (or is null)
/// contributes one window. Windows come back ordered by start; callers
/// must check containment against each.
pub fn legal_windows(rs: &RoomState, date: NaiveDate) -> Vec<LegalWindow> {
    let exception = rs.exception_on(date);

    if let Some(ex) = exception {
        if ex.closed {
            return Vec::new();
        }
        if let Some(window) = ex.window {
            let max_concurrent = rs
                .templates
                .iter()
                .filter(|t| t.applies_on(date))
                .map(|t| t.max_concurrent)
                .max()
                .unwrap_or(1);
            return vec![LegalWindow {
                window,
                max_concurrent,
                price_override: ex.price_cents,
                from_exception: true,
            }];
        }
    }

    let price_override = exception.and_then(|ex| ex.price_cents);
    let mut windows: Vec<LegalWindow> = rs
        .templates
        .iter()
        .filter(|t| t.applies_on(date))
        .map(|t| LegalWindow {
            window: t.window,
            max_concurrent: t.max_concurrent,
            price_override,
            from_exception: false,
        })
        .collect();
    windows.sort_by_key(|w| (w.window.start, w.window.end));
    windows
}

/// Pick the window that governs `slot` among those fully containing it.
/// Fixed tie-break, most permissive first: exception windows beat template
/// windows, then larger capacity wins.
pub fn governing_window(windows: &[LegalWindow], slot: &Slot) -> Option<LegalWindow> {
    windows
        .iter()
        .filter(|w| w.window.contains_slot(slot))
        .max_by_key(|w| (w.from_exception, w.max_concurrent))
        .copied()
}

// ── Slot arithmetic ──────────────────────────────────────────────

/// Merge sorted overlapping/adjacent slots into disjoint slots.
pub fn merge_overlapping(sorted: &[Slot]) -> Vec<Slot> {
    let mut merged: Vec<Slot> = Vec::new();
    for &slot in sorted {
        if let Some(last) = merged.last_mut()
            && slot.start <= last.end
        {
            last.end = last.end.max(slot.end);
            continue;
        }
        merged.push(slot);
    }
    merged
}

/// Subtract `to_remove` (sorted) from each slot in `base`.
pub fn subtract_slots(base: &[Slot], to_remove: &[Slot]) -> Vec<Slot> {
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
                result.push(Slot::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Slot::new(current_start, current_end));
        }
    }

    result
}

/// Sweep line: ranges where the booking count reaches `capacity`.
/// Returns sorted, merged slots representing fully-saturated time ranges.
pub fn saturated_slots(allocs: &[Slot], capacity: u32) -> Vec<Slot> {
    if allocs.is_empty() || capacity == 0 {
        return Vec::new();
    }
    if capacity == 1 {
        let mut sorted = allocs.to_vec();
        sorted.sort_by_key(|s| s.start);
        return merge_overlapping(&sorted);
    }

    let mut events: Vec<(Minute, i32)> = Vec::with_capacity(allocs.len() * 2);
    for a in allocs {
        events.push((a.start, 1));
        events.push((a.end, -1));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut result = Vec::new();
    let mut count: u32 = 0;
    let mut saturated_start: Option<Minute> = None;

    for (time, delta) in &events {
        if *delta > 0 {
            count += *delta as u32;
        } else {
            count -= (-*delta) as u32;
        }

        if count >= capacity && saturated_start.is_none() {
            saturated_start = Some(*time);
        } else if count < capacity
            && let Some(start) = saturated_start.take()
            && *time > start
        {
            result.push(Slot::new(start, *time));
        }
    }

    result
}

/// Free sub-windows of each legal window on `date`: legal windows minus
/// the ranges where active bookings already saturate the window capacity.
pub fn free_windows(rs: &RoomState, date: NaiveDate, min_duration: Option<Minute>) -> Vec<Slot> {
    let windows = legal_windows(rs, date);
    if windows.is_empty() {
        return Vec::new();
    }

    let active: Vec<Slot> = rs
        .bookings_on(date)
        .iter()
        .filter(|b| b.status.is_active())
        .map(|b| b.slot)
        .collect();

    let mut free = Vec::new();
    for w in &windows {
        let relevant: Vec<Slot> = active
            .iter()
            .filter(|s| s.overlaps(&w.window))
            .copied()
            .collect();
        let saturated = saturated_slots(&relevant, w.max_concurrent);
        free.extend(subtract_slots(&[w.window], &saturated));
    }

    free.sort_by_key(|s| s.start);
    let mut free = merge_overlapping(&free);
    if let Some(min) = min_duration {
        free.retain(|s| s.duration_minutes() >= min);
    }
    free
}
