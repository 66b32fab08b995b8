//! The roster: one [`MeetingUserInfo`] per expected participant.
//!
//! The roster is built in bulk from placeholders before anyone's media has
//! connected, with the instructor always first. Records are reset, never
//! removed, when a user leaves.

pub mod record;

pub use record::{MeetingUser, MeetingUserInfo, MuteChange};

use crate::providers::UserProfile;
use crate::video::View;
use common::types::{TransportId, UserId};
use std::collections::{HashMap, HashSet};

/// Ordered participant records.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    records: Vec<MeetingUserInfo>,
}

impl Roster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build placeholder records for `order`, attaching directory profiles
    /// where available. `order` must already be deduplicated (see
    /// [`placeholder_order`]).
    #[must_use]
    pub fn from_placeholders(
        order: &[UserId],
        profiles: &HashMap<UserId, UserProfile>,
        instructor: &UserId,
        local: &UserId,
    ) -> Self {
        let local_is_instructor = local == instructor;
        let records = order
            .iter()
            .map(|id| {
                let mut record =
                    MeetingUserInfo::placeholder(id.clone(), profiles.get(id).cloned());
                record.is_the_instructor = id == instructor;
                record.is_local_preview = id == local;
                record.show_indicators = local_is_instructor;
                record
            })
            .collect();
        Self { records }
    }

    #[must_use]
    pub fn records(&self) -> &[MeetingUserInfo] {
        &self.records
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut MeetingUserInfo> {
        self.records.iter_mut()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn find(&self, user: &UserId) -> Option<&MeetingUserInfo> {
        self.records.iter().find(|r| &r.user_id == user)
    }

    pub fn find_mut(&mut self, user: &UserId) -> Option<&mut MeetingUserInfo> {
        self.records.iter_mut().find(|r| &r.user_id == user)
    }

    /// Locate a record by the transport id assigned at join.
    pub fn find_by_transport_mut(&mut self, id: TransportId) -> Option<&mut MeetingUserInfo> {
        self.records
            .iter_mut()
            .find(|r| r.meeting_user_id == Some(id))
    }

    #[must_use]
    pub fn local(&self) -> Option<&MeetingUserInfo> {
        self.records.iter().find(|r| r.is_local_preview)
    }

    pub fn local_mut(&mut self) -> Option<&mut MeetingUserInfo> {
        self.records.iter_mut().find(|r| r.is_local_preview)
    }

    #[must_use]
    pub fn joined_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_joined).count()
    }

    /// Drop every record. Used on teardown.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// Read-only projection published to UI bindings after each mutation.
#[derive(Debug, Clone, Default)]
pub struct RosterSnapshot {
    pub records: Vec<MeetingUserInfo>,
    pub view: View,
}

impl RosterSnapshot {
    #[must_use]
    pub fn find(&self, user: &UserId) -> Option<&MeetingUserInfo> {
        self.records.iter().find(|r| &r.user_id == user)
    }

    #[must_use]
    pub fn user_ids(&self) -> Vec<UserId> {
        self.records.iter().map(|r| r.user_id.clone()).collect()
    }
}

/// Placeholder order for a session.
///
/// The instructor is always first. The local user comes second unless they
/// are the instructor or an observer; an observer is appended last. The
/// remaining participants follow in list order, without duplicates.
#[must_use]
pub fn placeholder_order(
    instructor: &UserId,
    local: &UserId,
    participants: &[UserId],
    is_observer: bool,
) -> Vec<UserId> {
    let mut seen: HashSet<&UserId> = HashSet::new();
    let mut order = Vec::with_capacity(participants.len() + 2);

    seen.insert(instructor);
    order.push(instructor.clone());

    let local_second = local != instructor && !is_observer;
    if local_second {
        seen.insert(local);
        order.push(local.clone());
    }

    for participant in participants {
        if seen.insert(participant) {
            order.push(participant.clone());
        }
    }

    if is_observer && seen.insert(local) {
        order.push(local.clone());
    }

    order
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<UserId> {
        raw.iter().map(|s| UserId::new(*s)).collect()
    }

    #[test]
    fn test_order_participant_is_second() {
        let order = placeholder_order(
            &UserId::new("A"),
            &UserId::new("C"),
            &ids(&["B", "C", "D"]),
            false,
        );
        assert_eq!(order, ids(&["A", "C", "B", "D"]));
    }

    #[test]
    fn test_order_instructor_local() {
        let order = placeholder_order(&UserId::new("A"), &UserId::new("A"), &ids(&["B", "C"]), false);
        assert_eq!(order, ids(&["A", "B", "C"]));
    }

    #[test]
    fn test_order_observer_appended_last() {
        let order = placeholder_order(&UserId::new("A"), &UserId::new("X"), &ids(&["B", "C"]), true);
        assert_eq!(order, ids(&["A", "B", "C", "X"]));
    }

    #[test]
    fn test_order_has_no_duplicates() {
        // Instructor listed as a participant, a participant listed twice.
        let order = placeholder_order(
            &UserId::new("A"),
            &UserId::new("B"),
            &ids(&["A", "B", "C", "C", "D"]),
            false,
        );
        assert_eq!(order, ids(&["A", "B", "C", "D"]));
        let unique: HashSet<_> = order.iter().collect();
        assert_eq!(unique.len(), order.len());
    }

    #[test]
    fn test_from_placeholders_sets_role_flags() {
        let order = ids(&["A", "B", "C"]);
        let mut profiles = HashMap::new();
        profiles.insert(UserId::new("B"), UserProfile::new("B", 2, "Bea"));

        let roster = Roster::from_placeholders(&order, &profiles, &UserId::new("A"), &UserId::new("B"));

        let first = roster.records().first().unwrap();
        assert!(first.is_the_instructor);
        assert!(!first.is_local_preview);

        let local = roster.local().unwrap();
        assert_eq!(local.user_id, UserId::new("B"));
        assert_eq!(local.display_name(), "Bea");
        // Indicators are an instructor-only affordance.
        assert!(roster.records().iter().all(|r| !r.show_indicators));
        assert!(roster.find(&UserId::new("C")).unwrap().profile.is_none());
    }

    #[test]
    fn test_find_by_transport() {
        let order = ids(&["A", "B"]);
        let mut roster =
            Roster::from_placeholders(&order, &HashMap::new(), &UserId::new("A"), &UserId::new("A"));
        assert!(roster.find_by_transport_mut(TransportId(5)).is_none());
        roster.find_mut(&UserId::new("B")).unwrap().meeting_user_id = Some(TransportId(5));
        assert_eq!(
            roster.find_by_transport_mut(TransportId(5)).unwrap().user_id,
            UserId::new("B")
        );
        assert!(roster.records().iter().all(|r| r.show_indicators));
    }
}
