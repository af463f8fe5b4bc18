use std::collections::HashMap;

use ladder_core::id::EntityId;

// ---------------------------------------------------------------------------
// EntitySummary
// ---------------------------------------------------------------------------

/// Levels gained per progression type since the last drain, in the order
/// the types were first recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntitySummary {
    counts: Vec<(String, u64)>,
}

impl EntitySummary {
    fn add(&mut self, type_id: &str, levels: u64) {
        match self.counts.iter_mut().find(|(t, _)| t == type_id) {
            Some((_, n)) => *n = n.saturating_add(levels),
            None => self.counts.push((type_id.to_string(), levels)),
        }
    }

    pub fn counts(&self) -> &[(String, u64)] {
        &self.counts
    }

    pub fn get(&self, type_id: &str) -> u64 {
        self.counts
            .iter()
            .find(|(t, _)| t == type_id)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|(_, n)| *n).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Render as `header`, one `line` per type, then `footer`.
    ///
    /// `line` may use `{type}` and `{count}`; `header` and `footer` may use
    /// `{total}`. Empty header or footer templates are skipped.
    pub fn render(&self, header: &str, line: &str, footer: &str) -> String {
        let total = self.total().to_string();
        let mut out = Vec::with_capacity(self.counts.len() + 2);
        if !header.is_empty() {
            out.push(header.replace("{total}", &total));
        }
        for (type_id, count) in &self.counts {
            if *count == 0 {
                continue;
            }
            out.push(
                line.replace("{type}", type_id)
                    .replace("{count}", &count.to_string()),
            );
        }
        if !footer.is_empty() {
            out.push(footer.replace("{total}", &total));
        }
        out.join("\n")
    }
}

// ---------------------------------------------------------------------------
// AutoSummary
// ---------------------------------------------------------------------------

/// Per-entity auto-advance tallies between two summary ticks.
#[derive(Debug, Clone, Default)]
pub struct AutoSummary {
    entries: HashMap<EntityId, EntitySummary>,
}

impl AutoSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `levels` gained in `type_id`. Zero is ignored.
    pub fn record(&mut self, entity: EntityId, type_id: &str, levels: u64) {
        if levels == 0 {
            return;
        }
        self.entries.entry(entity).or_default().add(type_id, levels);
    }

    /// Take and reset one entity's tallies.
    pub fn drain(&mut self, entity: EntityId) -> Option<EntitySummary> {
        self.entries.remove(&entity).filter(|s| !s.is_empty())
    }

    /// Take and reset every entity's tallies, sorted by entity id.
    pub fn drain_all(&mut self) -> Vec<(EntityId, EntitySummary)> {
        let mut all: Vec<_> = self
            .entries
            .drain()
            .filter(|(_, s)| !s.is_empty())
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    pub fn peek(&self, entity: EntityId) -> Option<&EntitySummary> {
        self.entries.get(&entity)
    }

    pub fn tracked_entities(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn e(n: u128) -> EntityId {
        EntityId::from_u128(n)
    }

    #[test]
    fn record_accumulates_per_type() {
        let mut s = AutoSummary::new();
        s.record(e(1), "rankup", 3);
        s.record(e(1), "rankup", 2);
        s.record(e(1), "prestige", 1);

        let summary = s.peek(e(1)).unwrap();
        assert_eq!(summary.get("rankup"), 5);
        assert_eq!(summary.get("prestige"), 1);
        assert_eq!(summary.total(), 6);
    }

    #[test]
    fn zero_levels_not_tracked() {
        let mut s = AutoSummary::new();
        s.record(e(1), "rankup", 0);
        assert_eq!(s.tracked_entities(), 0);
    }

    #[test]
    fn drain_resets() {
        let mut s = AutoSummary::new();
        s.record(e(1), "rankup", 4);
        assert_eq!(s.drain(e(1)).unwrap().total(), 4);
        assert!(s.drain(e(1)).is_none());
    }

    #[test]
    fn drain_all_sorted() {
        let mut s = AutoSummary::new();
        s.record(e(3), "rankup", 1);
        s.record(e(1), "rankup", 1);
        s.record(e(2), "rankup", 1);
        let ids: Vec<_> = s.drain_all().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![e(1), e(2), e(3)]);
        assert_eq!(s.tracked_entities(), 0);
    }

    #[test]
    fn render_keeps_first_recorded_order() {
        let mut s = AutoSummary::new();
        s.record(e(1), "prestige", 1);
        s.record(e(1), "rankup", 12);
        let text = s
            .drain(e(1))
            .unwrap()
            .render("Summary ({total}):", "- {type} x{count}", "");
        assert_eq!(text, "Summary (13):\n- prestige x1\n- rankup x12");
    }
}
