use std::collections::HashMap;

use murmur_types::models::PresenceRecord;
use uuid::Uuid;

/// Last-writer-wins presence per user.
#[derive(Debug, Default)]
pub struct PresenceStore {
    records: HashMap<Uuid, PresenceRecord>,
}

impl PresenceStore {
    pub fn set(&mut self, user_id: Uuid, record: PresenceRecord) {
        self.records.insert(user_id, record);
    }

    pub fn get(&self, user_id: Uuid) -> Option<PresenceRecord> {
        self.records.get(&user_id).copied()
    }

    pub fn clear(&mut self, user_id: Uuid) -> Option<PresenceRecord> {
        self.records.remove(&user_id)
    }

    /// Users whose record says online and for whom `is_live` holds.
    pub fn list_online(&self, is_live: impl Fn(Uuid) -> bool) -> Vec<Uuid> {
        self.records
            .iter()
            .filter(|(user_id, record)| record.online && is_live(**user_id))
            .map(|(user_id, _)| *user_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrite_and_clear() {
        let mut store = PresenceStore::default();
        let user = Uuid::new_v4();
        let conv = Uuid::new_v4();

        store.set(user, PresenceRecord::online());
        store.set(user, PresenceRecord::focused(conv));
        assert_eq!(store.get(user).unwrap().current_conversation_id, Some(conv));

        store.clear(user);
        assert!(store.get(user).is_none());
    }

    #[test]
    fn list_online_excludes_stale_and_offline() {
        let mut store = PresenceStore::default();
        let live = Uuid::new_v4();
        let stale = Uuid::new_v4();
        let away = Uuid::new_v4();
        store.set(live, PresenceRecord::online());
        store.set(stale, PresenceRecord::online());
        store.set(away, PresenceRecord::offline());

        let online = store.list_online(|user| user != stale);
        assert_eq!(online, vec![live]);
    }
}
