//! Pure view projections over store and roster state.
//!
//! Nothing here mutates. The console calls these on every repaint with
//! whatever filters the operator currently has set, so they must be
//! deterministic for a given input and cheap enough to run per frame.

use wd_core::{Notification, TrackedUser};

use crate::selection::SelectionSet;

/// Read-state predicate for the notification list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadFilter {
    #[default]
    All,
    UnreadOnly,
    ReadOnly,
}

/// Operator-set filters, combined with AND.
#[derive(Debug, Clone, Default)]
pub struct NotificationFilter {
    pub read: ReadFilter,
    /// Case-insensitive substring matched against user name, message,
    /// and kind. Empty matches everything.
    pub query: String,
}

impl NotificationFilter {
    pub fn unread_only() -> Self {
        Self {
            read: ReadFilter::UnreadOnly,
            query: String::new(),
        }
    }
}

fn read_matches(filter: ReadFilter, notification: &Notification) -> bool {
    match filter {
        ReadFilter::All => true,
        ReadFilter::UnreadOnly => !notification.read,
        ReadFilter::ReadOnly => notification.read,
    }
}

fn query_matches(needle: &str, notification: &Notification) -> bool {
    if needle.is_empty() {
        return true;
    }
    notification.user_name.to_lowercase().contains(needle)
        || notification.message.to_lowercase().contains(needle)
        || notification.kind.to_lowercase().contains(needle)
}

/// Filters notifications without reordering them. The store keeps the
/// list most-recent-first and the view preserves that.
pub fn filter_notifications<'a>(
    notifications: &'a [Notification],
    filter: &NotificationFilter,
) -> Vec<&'a Notification> {
    let needle = filter.query.to_lowercase();
    notifications
        .iter()
        .filter(|n| read_matches(filter.read, n) && query_matches(&needle, n))
        .collect()
}

/// Roster ordered for display: selected users first, roster order
/// preserved within each group. The sort is stable so two repaints with
/// the same inputs render identically.
pub fn roster_view<'a>(
    users: &'a [TrackedUser],
    selection: &SelectionSet,
) -> Vec<&'a TrackedUser> {
    let mut view: Vec<&TrackedUser> = users.iter().collect();
    view.sort_by_key(|user| !selection.is_selected(user.id));
    view
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wd_core::{NotificationId, Severity, UserId};

    fn notification(id: u64, user_name: &str, message: &str, read: bool) -> Notification {
        Notification {
            id: NotificationId::new(id),
            kind: "user-inactive".to_string(),
            severity: Severity::Warning,
            message: message.to_string(),
            user_id: UserId::new(id as i64),
            user_name: user_name.to_string(),
            timestamp: Utc::now(),
            read,
        }
    }

    fn user(id: i64, name: &str) -> TrackedUser {
        TrackedUser {
            id: UserId::new(id),
            name: name.to_string(),
            email: None,
            active_status: false,
            last_activity: None,
        }
    }

    // ------------------------------------------------------------------------
    // Notification filtering
    // ------------------------------------------------------------------------

    #[test]
    fn test_default_filter_passes_everything() {
        let list = vec![
            notification(1, "Avery", "went quiet", false),
            notification(2, "Blake", "went quiet", true),
        ];
        let view = filter_notifications(&list, &NotificationFilter::default());
        assert_eq!(view.len(), 2);
    }

    #[test]
    fn test_unread_only() {
        let list = vec![
            notification(1, "Avery", "went quiet", false),
            notification(2, "Blake", "went quiet", true),
            notification(3, "Casey", "went quiet", false),
        ];
        let view = filter_notifications(&list, &NotificationFilter::unread_only());
        let ids: Vec<u64> = view.iter().map(|n| n.id.as_u64()).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_read_only() {
        let list = vec![
            notification(1, "Avery", "went quiet", false),
            notification(2, "Blake", "went quiet", true),
        ];
        let filter = NotificationFilter {
            read: ReadFilter::ReadOnly,
            query: String::new(),
        };
        let view = filter_notifications(&list, &filter);
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].id.as_u64(), 2);
    }

    #[test]
    fn test_query_is_case_insensitive_over_all_fields() {
        let list = vec![
            notification(1, "Avery", "went quiet", false),
            notification(2, "Blake", "CPU pegged", false),
            notification(3, "Casey", "went quiet", false),
        ];

        let by_name = NotificationFilter {
            read: ReadFilter::All,
            query: "aVeRy".to_string(),
        };
        assert_eq!(filter_notifications(&list, &by_name).len(), 1);

        let by_message = NotificationFilter {
            read: ReadFilter::All,
            query: "cpu".to_string(),
        };
        assert_eq!(filter_notifications(&list, &by_message).len(), 1);

        let by_kind = NotificationFilter {
            read: ReadFilter::All,
            query: "INACTIVE".to_string(),
        };
        assert_eq!(filter_notifications(&list, &by_kind).len(), 3);
    }

    #[test]
    fn test_filters_combine_with_and() {
        let list = vec![
            notification(1, "Avery", "went quiet", false),
            notification(2, "Avery", "went quiet", true),
        ];
        let filter = NotificationFilter {
            read: ReadFilter::UnreadOnly,
            query: "avery".to_string(),
        };
        let view = filter_notifications(&list, &filter);
        assert_eq!(view.len(), 1);
        assert!(!view[0].read);
    }

    #[test]
    fn test_filtering_preserves_order() {
        let list = vec![
            notification(3, "Avery", "third", false),
            notification(2, "Avery", "second", false),
            notification(1, "Avery", "first", false),
        ];
        let view = filter_notifications(&list, &NotificationFilter::default());
        let messages: Vec<&str> = view.iter().map(|n| n.message.as_str()).collect();
        assert_eq!(messages, vec!["third", "second", "first"]);
    }

    #[test]
    fn test_no_match_yields_empty() {
        let list = vec![notification(1, "Avery", "went quiet", false)];
        let filter = NotificationFilter {
            read: ReadFilter::All,
            query: "zebra".to_string(),
        };
        assert!(filter_notifications(&list, &filter).is_empty());
    }

    // ------------------------------------------------------------------------
    // Roster ordering
    // ------------------------------------------------------------------------

    #[test]
    fn test_selected_users_sort_first() {
        let users = vec![user(1, "Avery"), user(2, "Blake"), user(3, "Casey")];
        let mut selection = SelectionSet::default();
        selection.insert(UserId::new(3));

        let view = roster_view(&users, &selection);
        let names: Vec<&str> = view.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["Casey", "Avery", "Blake"]);
    }

    #[test]
    fn test_roster_order_stable_within_groups() {
        let users = vec![
            user(1, "Avery"),
            user(2, "Blake"),
            user(3, "Casey"),
            user(4, "Drew"),
        ];
        let mut selection = SelectionSet::default();
        selection.insert(UserId::new(2));
        selection.insert(UserId::new(4));

        let view = roster_view(&users, &selection);
        let names: Vec<&str> = view.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["Blake", "Drew", "Avery", "Casey"]);
    }

    #[test]
    fn test_empty_selection_keeps_roster_order() {
        let users = vec![user(2, "Blake"), user(1, "Avery")];
        let view = roster_view(&users, &SelectionSet::default());
        let names: Vec<&str> = view.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["Blake", "Avery"]);
    }
}
