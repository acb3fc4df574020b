//! Player context: identity fields from the log become the partition key
//! for everything the tracker writes.

use embertrack::event_models::PlayerFieldKey;

/// Partition key for slot state, runs, deltas, and prices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerScope {
    pub key: String,
    pub season_id: i64,
}

impl PlayerScope {
    pub fn new(key: impl Into<String>, season_id: i64) -> Self {
        Self {
            key: key.into(),
            season_id,
        }
    }
}

/// Accumulates identity fields and derives the active scope.
///
/// A stable RoleId wins; otherwise `{SeasonId}_{Name}` once both are known.
#[derive(Debug, Default)]
pub struct PlayerContext {
    name: Option<String>,
    role_id: Option<String>,
    season_id: Option<i64>,
    scope: Option<PlayerScope>,
}

impl PlayerContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scope(&self) -> Option<&PlayerScope> {
        self.scope.as_ref()
    }

    pub fn player_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn season_id(&self) -> Option<i64> {
        self.season_id
    }

    /// Feed one identity field. Returns the new scope when it changed.
    pub fn observe(&mut self, key: PlayerFieldKey, value: &str) -> Option<PlayerScope> {
        match key {
            PlayerFieldKey::RoleName => self.name = Some(value.to_string()),
            PlayerFieldKey::RoleId => self.role_id = Some(value.to_string()),
            PlayerFieldKey::SeasonId => self.season_id = value.parse().ok(),
        }

        let derived = self.derive();
        if derived != self.scope {
            self.scope = derived.clone();
            return derived;
        }
        None
    }

    fn derive(&self) -> Option<PlayerScope> {
        let season = self.season_id.unwrap_or(0);
        if let Some(role_id) = &self.role_id {
            return Some(PlayerScope::new(role_id.clone(), season));
        }
        match (&self.name, self.season_id) {
            (Some(name), Some(season_id)) => {
                Some(PlayerScope::new(format!("{season_id}_{name}"), season_id))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_id_wins_over_name() {
        let mut ctx = PlayerContext::new();
        assert!(ctx.observe(PlayerFieldKey::RoleName, "Kaelyn").is_none());
        assert!(ctx.observe(PlayerFieldKey::SeasonId, "10").is_some());
        let scope = ctx.observe(PlayerFieldKey::RoleId, "123456789");
        assert_eq!(scope.unwrap().key, "123456789");
    }

    #[test]
    fn test_name_and_season_form_fallback_scope() {
        let mut ctx = PlayerContext::new();
        assert!(ctx.observe(PlayerFieldKey::RoleName, "Kaelyn").is_none());
        let scope = ctx.observe(PlayerFieldKey::SeasonId, "10").unwrap();
        assert_eq!(scope.key, "10_Kaelyn");
        assert_eq!(scope.season_id, 10);
    }

    #[test]
    fn test_character_switch_changes_scope_once() {
        let mut ctx = PlayerContext::new();
        ctx.observe(PlayerFieldKey::SeasonId, "10");
        ctx.observe(PlayerFieldKey::RoleName, "Kaelyn");
        // Re-observing the same identity is not a change.
        assert!(ctx.observe(PlayerFieldKey::RoleName, "Kaelyn").is_none());
        let changed = ctx.observe(PlayerFieldKey::RoleName, "Vesper");
        assert_eq!(changed.unwrap().key, "10_Vesper");
    }
}
