use crate::protocol::{AgentCard, CardStatus};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Last-known state of every remote agent, keyed by agent id.
#[derive(Debug, Default)]
pub struct AgentDirectory {
    agents: HashMap<String, AgentCard>,
}

impl AgentDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the card for `card.id`. Returns `true` if the agent
    /// was not known before.
    pub fn upsert(&mut self, card: AgentCard) -> bool {
        self.agents.insert(card.id.clone(), card).is_none()
    }

    /// Refresh liveness for a known agent: last-seen moves to `at` and the
    /// status becomes online. Returns `false` for unknown agents.
    pub fn touch(&mut self, agent_id: &str, at: DateTime<Utc>) -> bool {
        match self.agents.get_mut(agent_id) {
            Some(card) => {
                card.last_seen = at;
                card.status = CardStatus::Online;
                true
            }
            None => false,
        }
    }

    /// Record a status change for a known agent.
    pub fn set_status(
        &mut self,
        agent_id: &str,
        status: CardStatus,
        at: DateTime<Utc>,
    ) -> Option<AgentCard> {
        let card = self.agents.get_mut(agent_id)?;
        card.status = status;
        card.last_seen = at;
        Some(card.clone())
    }

    /// Card of `agent_id`.
    pub fn get(&self, agent_id: &str) -> Option<&AgentCard> {
        self.agents.get(agent_id)
    }

    /// Whether `agent_id` is known.
    pub fn contains(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    /// Forget `agent_id`.
    pub fn remove(&mut self, agent_id: &str) -> Option<AgentCard> {
        self.agents.remove(agent_id)
    }

    /// All cards, ordered by id.
    pub fn list(&self) -> Vec<AgentCard> {
        let mut cards: Vec<AgentCard> = self.agents.values().cloned().collect();
        cards.sort_by(|a, b| a.id.cmp(&b.id));
        cards
    }

    /// Drop agents not seen since `now - max_age`, returning their ids.
    pub fn prune_stale(&mut self, now: DateTime<Utc>, max_age: Duration) -> Vec<String> {
        let cutoff = now - max_age;
        let stale: Vec<String> = self
            .agents
            .values()
            .filter(|card| card.last_seen < cutoff)
            .map(|card| card.id.clone())
            .collect();
        for id in &stale {
            self.agents.remove(id);
        }
        stale
    }

    /// Number of known agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether no agent is known.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::protocol::Capability;

    #[test]
    fn test_upsert_is_idempotent() {
        let mut dir = AgentDirectory::new();
        let card = AgentCard::new("a", "Agent A");
        assert!(dir.upsert(card.clone()));
        assert!(!dir.upsert(card.with_capability(Capability::new("search", ""))));
        assert_eq!(dir.len(), 1);
        assert_eq!(dir.get("a").unwrap().capabilities.len(), 1);
    }

    #[test]
    fn test_touch_marks_online() {
        let mut dir = AgentDirectory::new();
        let mut card = AgentCard::new("a", "Agent A");
        card.status = CardStatus::Offline;
        dir.upsert(card);

        let later = Utc::now() + Duration::seconds(5);
        assert!(dir.touch("a", later));
        let card = dir.get("a").unwrap();
        assert_eq!(card.status, CardStatus::Online);
        assert_eq!(card.last_seen, later);

        assert!(!dir.touch("unknown", later));
    }

    #[test]
    fn test_set_status() {
        let mut dir = AgentDirectory::new();
        dir.upsert(AgentCard::new("a", "Agent A"));
        let updated = dir.set_status("a", CardStatus::Busy, Utc::now()).unwrap();
        assert_eq!(updated.status, CardStatus::Busy);
        assert!(dir.set_status("b", CardStatus::Busy, Utc::now()).is_none());
    }

    #[test]
    fn test_prune_stale() {
        let mut dir = AgentDirectory::new();
        let now = Utc::now();
        let mut old = AgentCard::new("old", "Old");
        old.last_seen = now - Duration::minutes(30);
        dir.upsert(old);
        dir.upsert(AgentCard::new("fresh", "Fresh"));

        let removed = dir.prune_stale(now, Duration::minutes(15));
        assert_eq!(removed, vec!["old".to_string()]);
        assert!(dir.contains("fresh"));
        assert!(!dir.contains("old"));
    }

    #[test]
    fn test_list_sorted() {
        let mut dir = AgentDirectory::new();
        dir.upsert(AgentCard::new("c", "C"));
        dir.upsert(AgentCard::new("a", "A"));
        dir.upsert(AgentCard::new("b", "B"));
        let ids: Vec<String> = dir.list().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
